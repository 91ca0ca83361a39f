use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use depot_types::ObjectId;

/// Read buffer size used for streaming digests.
const CHUNK: usize = 64 * 1024;

/// BLAKE3 content hasher producing [`ObjectId`]s.
///
/// Used in two modes: one-shot over an in-memory buffer, or incrementally via
/// [`update`](Self::update) / [`Write`] when content is streamed.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
    len: u64,
}

impl ContentHasher {
    /// Create a fresh incremental hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash an in-memory buffer.
    pub fn hash(data: &[u8]) -> ObjectId {
        ObjectId::from_hash(*blake3::hash(data).as_bytes())
    }

    /// Hash everything a reader yields. Returns the id and the byte count.
    pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(ObjectId, u64)> {
        let mut hasher = Self::new();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let len = hasher.len;
        Ok((hasher.finalize(), len))
    }

    /// Hash the contents of a file.
    pub fn hash_file(path: &Path) -> io::Result<ObjectId> {
        let file = File::open(path)?;
        Self::hash_reader(file).map(|(id, _)| id)
    }

    /// Verify that data produces the expected object ID.
    pub fn verify(data: &[u8], expected: &ObjectId) -> bool {
        Self::hash(data) == *expected
    }

    /// Feed more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if nothing has been hashed yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish and return the object id.
    pub fn finalize(&self) -> ObjectId {
        ObjectId::from_hash(*self.inner.finalize().as_bytes())
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A writer that forwards every byte to `inner` while hashing it.
///
/// This is how large objects are hashed and persisted in a single pass.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.hasher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hasher.is_empty()
    }

    /// Return the inner writer together with the digest of everything written.
    pub fn finish(self) -> (W, ObjectId) {
        let id = self.hasher.finalize();
        (self.inner, id)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::hash(data), ContentHasher::hash(data));
    }

    #[test]
    fn hash_is_plain_blake3() {
        let id = ContentHasher::hash(b"abc");
        assert_eq!(id.as_bytes(), blake3::hash(b"abc").as_bytes());
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::hash(b"original");
        assert!(ContentHasher::verify(b"original", &id));
        assert!(!ContentHasher::verify(b"tampered", &id));
    }

    #[test]
    fn hash_file_matches_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"file content").unwrap();
        assert_eq!(
            ContentHasher::hash_file(&path).unwrap(),
            ContentHasher::hash(b"file content")
        );
    }

    #[test]
    fn hashing_writer_tees_bytes() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"part one, ").unwrap();
        writer.write_all(b"part two").unwrap();
        assert_eq!(writer.len(), 18);
        let (inner, id) = writer.finish();
        assert_eq!(inner, b"part one, part two");
        assert_eq!(id, ContentHasher::hash(b"part one, part two"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn streaming_equals_one_shot(data in proptest::collection::vec(any::<u8>(), 0..200_000)) {
            let (id, len) = ContentHasher::hash_reader(data.as_slice()).unwrap();
            prop_assert_eq!(len, data.len() as u64);
            prop_assert_eq!(id, ContentHasher::hash(&data));
        }
    }
}
