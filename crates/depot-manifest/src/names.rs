//! Manifest name and tag validation.
//!
//! Valid names:
//! - Must be non-empty
//! - Must not contain whitespace, `:`, `\`, `*`, `?`
//! - Must not start or end with `/` or contain `//`
//! - Components between slashes must be non-empty and not start with `.`
//!
//! Valid tags follow the same character rules but may not contain `/` at all.
//! Both end up as path components of the manifest directory, so these rules
//! also keep records inside the store root.

use depot_types::ManifestKey;

use crate::error::{ManifestError, Result};

/// Characters that are forbidden anywhere in a name or tag.
const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', ':', '\\', '*', '?'];

/// Validate a manifest name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use depot_manifest::names::validate_name;
///
/// assert!(validate_name("product/app/linux").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("a/../b").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: String| ManifestError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty".into()));
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid("must not start or end with '/'".into()));
    }
    for component in name.split('/') {
        if component.is_empty() {
            return Err(invalid("path components must not be empty".into()));
        }
        if component.starts_with('.') {
            return Err(invalid(format!(
                "component must not start with '.': {component:?}"
            )));
        }
    }
    Ok(())
}

/// Validate a manifest tag.
pub fn validate_tag(tag: &str) -> Result<()> {
    let invalid = |reason: String| ManifestError::InvalidTag {
        tag: tag.to_string(),
        reason,
    };

    if tag.is_empty() {
        return Err(invalid("tag must not be empty".into()));
    }
    if let Some(ch) = tag.chars().find(|c| FORBIDDEN_CHARS.contains(c) || *c == '/') {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }
    if tag.starts_with('.') {
        return Err(invalid("must not start with '.'".into()));
    }
    Ok(())
}

/// Validate both halves of a key.
pub fn validate_key(key: &ManifestKey) -> Result<()> {
    validate_name(key.name())?;
    validate_tag(key.tag())
}
