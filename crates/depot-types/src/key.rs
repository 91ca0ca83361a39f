use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifies one immutable manifest version.
///
/// `name` may be hierarchical (`product/app/os`); `tag` is an opaque version
/// string. The textual form is `name:tag` and is parsed at the last `:` so
/// that a name segment never has to be escaped.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestKey {
    name: String,
    tag: String,
}

impl ManifestKey {
    /// Create a key from a name and a tag.
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// The (possibly hierarchical) manifest name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns `true` if this key's name equals `prefix` or lives in the
    /// `prefix/` namespace.
    pub fn is_in_namespace(&self, prefix: &str) -> bool {
        self.name == prefix
            || (self.name.len() > prefix.len()
                && self.name.starts_with(prefix)
                && self.name.as_bytes()[prefix.len()] == b'/')
    }
}

impl fmt::Debug for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManifestKey({}:{})", self.name, self.tag)
    }
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for ManifestKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((name, tag)) if !name.is_empty() && !tag.is_empty() => {
                Ok(Self::new(name, tag))
            }
            _ => Err(TypeError::InvalidManifestKey(s.to_string())),
        }
    }
}
