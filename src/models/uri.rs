//! Identifier extraction from resource references.

use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// A reference is valid only if it ends in `/<uuid>`.
static TRAILING_UUID: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r".*/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$").ok()
});

/// Extracts the trailing UUID from a concept or agent reference.
///
/// # Errors
///
/// Returns [`Error::MalformedReference`] when the reference does not end in a
/// path separator followed by a lower-case 8-4-4-4-12 UUID.
///
/// # Example
///
/// ```rust
/// use annotations_rw::models::uri::extract_uuid;
///
/// let id = extract_uuid("http://api.ft.com/things/a7732a22-3884-4bfe-9761-fef161e41d69")?;
/// assert_eq!(id, "a7732a22-3884-4bfe-9761-fef161e41d69");
/// # Ok::<(), annotations_rw::Error>(())
/// ```
pub fn extract_uuid(reference: &str) -> Result<String> {
    TRAILING_UUID
        .as_ref()
        .and_then(|re| re.captures(reference))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::MalformedReference(reference.to_string()))
}

/// Reduces a predicate given as a URI to its last path segment.
///
/// Bare predicate keys are returned unchanged.
#[must_use]
pub fn predicate_key(predicate: &str) -> &str {
    predicate
        .rsplit_once('/')
        .map_or(predicate, |(_, segment)| segment)
}

/// Builds the public resource URL for a thing identifier.
#[must_use]
pub fn thing_url(base_url: &str, uuid: &str) -> String {
    format!("{}/things/{uuid}", base_url.trim_end_matches('/'))
}
