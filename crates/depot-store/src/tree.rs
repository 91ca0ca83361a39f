use std::collections::BTreeMap;
use std::fmt;

use depot_types::{ManifestKey, ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::traits::{InsertHook, ObjectStore};

/// What a tree entry's target object contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Raw file content.
    Blob,
    /// A nested [`Tree`].
    Tree,
    /// A [`ManifestReference`] pointing at another manifest.
    Manifest,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blob => write!(f, "blob"),
            Self::Tree => write!(f, "tree"),
            Self::Manifest => write!(f, "manifest"),
        }
    }
}

/// Key of a tree entry. Entries sort by name, then by type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeKey {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
}

impl TreeKey {
    pub fn new(name: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            name: name.into(),
            entry_type,
        }
    }
}

/// Serialized form of one entry.
#[derive(Serialize, Deserialize)]
struct EntryRecord {
    #[serde(flatten)]
    key: TreeKey,
    id: ObjectId,
}

#[derive(Serialize, Deserialize)]
struct TreeRecord {
    entries: Vec<EntryRecord>,
}

/// Immutable, sorted directory snapshot mapping [`TreeKey`]s to object ids.
///
/// Built with a [`TreeBuilder`]; never mutated afterwards. The encoding is
/// canonical (entries in key order) so equal trees always hash equally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: BTreeMap<TreeKey, ObjectId>,
}

impl Tree {
    /// Create an empty tree.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a tree.
    pub fn builder() -> TreeBuilder {
        TreeBuilder::default()
    }

    /// Look up an entry.
    pub fn get(&self, name: &str, entry_type: EntryType) -> Option<&ObjectId> {
        self.entries.get(&TreeKey::new(name, entry_type))
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TreeKey, &ObjectId)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical byte encoding.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        let record = TreeRecord {
            entries: self
                .entries
                .iter()
                .map(|(key, id)| EntryRecord {
                    key: key.clone(),
                    id: *id,
                })
                .collect(),
        };
        serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode a tree stored under `id`.
    pub fn from_bytes(id: &ObjectId, data: &[u8]) -> StoreResult<Self> {
        let record: TreeRecord =
            serde_json::from_slice(data).map_err(|e| StoreError::InvalidObject {
                id: *id,
                reason: format!("not a tree: {e}"),
            })?;
        let mut entries = BTreeMap::new();
        for entry in record.entries {
            if entries.insert(entry.key.clone(), entry.id).is_some() {
                return Err(StoreError::InvalidObject {
                    id: *id,
                    reason: format!("duplicate entry {:?}", entry.key.name),
                });
            }
        }
        Ok(Self { entries })
    }

    /// Insert this tree into a store.
    pub fn store(&self, store: &dyn ObjectStore, hook: &dyn InsertHook) -> StoreResult<ObjectId> {
        store.insert_bytes(&self.to_bytes()?, hook)
    }

    /// Load a tree from a store.
    pub fn load(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Self> {
        let data = store.read(id)?;
        Self::from_bytes(id, &data)
    }
}

/// Accumulates entries and freezes them into a [`Tree`].
#[derive(Debug, Default)]
pub struct TreeBuilder {
    entries: BTreeMap<TreeKey, ObjectId>,
}

impl TreeBuilder {
    /// Add an entry. Adding the same key twice is an error.
    pub fn add(&mut self, key: TreeKey, id: ObjectId) -> StoreResult<&mut Self> {
        if self.entries.contains_key(&key) {
            return Err(StoreError::DuplicateEntry(format!(
                "{} ({})",
                key.name, key.entry_type
            )));
        }
        self.entries.insert(key, id);
        Ok(self)
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into an immutable tree.
    pub fn build(self) -> Tree {
        Tree {
            entries: self.entries,
        }
    }
}

/// Object content of a [`EntryType::Manifest`] entry: the key of another,
/// independently versioned manifest.
///
/// Resolving it is an explicit hop through the manifest store rather than a
/// pointer into the other manifest's tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestReference {
    pub manifest: ManifestKey,
}

impl ManifestReference {
    pub fn new(manifest: ManifestKey) -> Self {
        Self { manifest }
    }

    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(id: &ObjectId, data: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(data).map_err(|e| StoreError::InvalidObject {
            id: *id,
            reason: format!("not a manifest reference: {e}"),
        })
    }

    pub fn store(&self, store: &dyn ObjectStore, hook: &dyn InsertHook) -> StoreResult<ObjectId> {
        store.insert_bytes(&self.to_bytes()?, hook)
    }

    pub fn load(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Self> {
        let data = store.read(id)?;
        Self::from_bytes(id, &data)
    }
}
