//! Key and prefix arithmetic.
//!
//! The store lists by path segment while the clients filter by plain string
//! prefix, so a listing is issued against the deepest complete segment of
//! the prefix and narrowed afterwards.

use std::path::{Component, Path, PathBuf};

use object_store::path::Path as StorePath;

use crate::{Error, Result};

/// Listing request derived from a string prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingScope {
    root: Option<StorePath>,
    prefix: String,
}

impl ListingScope {
    /// Creates a scope selecting every key that starts with `prefix`.
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_start_matches('/');
        let root = prefix
            .rfind('/')
            .map(|idx| &prefix[..idx])
            .and_then(|dir| StorePath::parse(dir).ok())
            .filter(|root| root.as_ref() != "");

        Self {
            root,
            prefix: prefix.to_string(),
        }
    }

    /// Segment-aligned root handed to the store listing.
    pub fn root(&self) -> Option<&StorePath> {
        self.root.as_ref()
    }

    /// String prefix every selected key starts with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns whether `key` falls inside the scope.
    pub fn contains(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

/// Store location of `key`, byte for byte.
///
/// Characters such as `#`, `[` or `%` reach the store unchanged, so a listed
/// key always addresses the object it came from. Empty segments, `.`, `..`
/// and control characters are rejected.
pub fn store_path(key: &str) -> Result<StorePath> {
    StorePath::parse(key)
        .map_err(|e| Error::InvalidRequest(format!("invalid key '{key}': {e}")))
}

/// Replaces the leading `from` prefix of `key` with `to`.
pub fn rebase(key: &str, from: &str, to: &str) -> String {
    let from = from.trim_start_matches('/');
    let rest = key.strip_prefix(from).unwrap_or(key);
    format!("{to}{rest}")
}

/// Last segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').find(|part| !part.is_empty()).unwrap_or(key)
}

/// Local path of `key` relative to the listed `prefix`.
///
/// A key equal to the prefix maps to its file name. When the prefix stops in
/// the middle of a segment, the path is taken relative to the prefix's
/// parent directory so that no partial segment name is produced. Keys that
/// would leave the destination directory are rejected.
pub fn relative_path(prefix: &str, key: &str) -> Result<PathBuf> {
    let prefix = prefix.trim_start_matches('/');

    let relative = match key.strip_prefix(prefix) {
        _ if prefix.is_empty() => key,
        None => key,
        Some("") => file_name(key),
        Some(rest) if prefix.ends_with('/') || rest.starts_with('/') => rest,
        Some(_) => match prefix.rfind('/') {
            Some(idx) => &key[idx + 1..],
            None => key,
        },
    };

    let relative = Path::new(relative.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(Error::InvalidRequest(format!(
            "key '{key}' cannot be stored under the download directory"
        )));
    }

    Ok(relative.to_path_buf())
}
