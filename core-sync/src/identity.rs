//! # Identity Resolution
//!
//! Media objects are identified structurally: the hash key is the MD5 of the
//! file name followed by the file's modification time (UTC, RFC 3339 with
//! nanoseconds). Content is never read.
//!
//! Hash keys are unique per gallery. When a new key collides with one already
//! in use, the timestamp is moved forward one second and the key recomputed
//! until it is free. The bump lives only in the key; the file is untouched.
//!
//! A file is resolved against the reconciliation maps in two steps:
//! 1. **Positional** - an object of the current album whose original path is
//!    the file's path.
//! 2. **Hash** - an object whose key is in the file's candidate chain, is not
//!    already claimed by this run, and whose recorded original is gone from
//!    disk (i.e. the file was moved here).

use crate::reconciliation::ReconciliationState;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use core_library::AlbumId;
use std::collections::HashSet;
use std::path::Path;
use std::time::SystemTime;

/// MD5 hex digest of `file_name` followed by `timestamp`.
pub fn compute_hash_key(file_name: &str, timestamp: DateTime<Utc>) -> String {
    let input = format!(
        "{}{}",
        file_name,
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    );
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Identity timestamp of a file, from its modification time.
pub fn identity_timestamp(modified: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(modified)
}

/// Every hash key in use in the gallery during a run.
#[derive(Debug, Default)]
pub struct HashKeyRegistry {
    used: HashSet<String>,
}

impl HashKeyRegistry {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            used: keys.into_iter().filter(|k| !k.is_empty()).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.used.contains(key)
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Give up `key` so it may be assigned again.
    pub fn release(&mut self, key: &str) {
        self.used.remove(key);
    }

    /// Claim the first free key in the chain for `file_name` at `timestamp`.
    pub fn assign_unique(&mut self, file_name: &str, timestamp: DateTime<Utc>) -> String {
        let mut timestamp = timestamp;
        loop {
            let key = compute_hash_key(file_name, timestamp);
            if self.used.insert(key.clone()) {
                return key;
            }
            timestamp += Duration::seconds(1);
        }
    }

    /// True when `key` is one of the keys `assign_unique` could have produced
    /// for this file given the keys currently in use.
    pub fn chain_contains(&self, file_name: &str, timestamp: DateTime<Utc>, key: &str) -> bool {
        candidate_chain(self, file_name, timestamp).any(|candidate| candidate == key)
    }
}

/// Keys for `file_name` from `timestamp` onward, ending after the first key
/// that is not in use.
fn candidate_chain<'a>(
    registry: &'a HashKeyRegistry,
    file_name: &'a str,
    timestamp: DateTime<Utc>,
) -> impl Iterator<Item = String> + 'a {
    let mut next = Some(timestamp);
    std::iter::from_fn(move || {
        let timestamp = next?;
        let key = compute_hash_key(file_name, timestamp);
        next = registry
            .contains(&key)
            .then(|| timestamp + Duration::seconds(1));
        Some(key)
    })
}

/// Find the existing media object that `path` corresponds to.
///
/// Returns its current hash key in the reconciliation state.
pub(crate) async fn resolve(
    state: &ReconciliationState,
    hashes: &HashKeyRegistry,
    album_id: AlbumId,
    path: &Path,
    file_name: &str,
    timestamp: DateTime<Utc>,
) -> Option<String> {
    if let Some(key) = state.key_for_original(path) {
        if state
            .media_object(key)
            .is_some_and(|object| object.album_id == album_id)
        {
            return Some(key.to_string());
        }
    }

    for candidate in candidate_chain(hashes, file_name, timestamp) {
        let Some(object) = state.media_object(&candidate) else {
            continue;
        };
        if object.is_synchronized {
            continue;
        }
        let original_exists = tokio::fs::try_exists(&object.original.physical_path)
            .await
            .unwrap_or(false);
        if !original_exists {
            return Some(candidate);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_hash_key_is_md5_of_name_and_timestamp() {
        let key = compute_hash_key("photo.jpg", ts());
        let expected = format!(
            "{:x}",
            md5::compute("photo.jpg2024-05-01T12:00:00.000000000Z".as_bytes())
        );
        assert_eq!(key, expected);
        assert_eq!(key.len(), 32);
        assert_ne!(key, compute_hash_key("photo.jpg", ts() + Duration::seconds(1)));
    }

    #[test]
    fn test_assign_unique_bumps_timestamp_on_collision() {
        let mut registry = HashKeyRegistry::default();

        let first = registry.assign_unique("photo.jpg", ts());
        let second = registry.assign_unique("photo.jpg", ts());
        let third = registry.assign_unique("photo.jpg", ts());

        assert_eq!(first, compute_hash_key("photo.jpg", ts()));
        assert_eq!(second, compute_hash_key("photo.jpg", ts() + Duration::seconds(1)));
        assert_eq!(third, compute_hash_key("photo.jpg", ts() + Duration::seconds(2)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_release_makes_key_available_again() {
        let mut registry = HashKeyRegistry::new(vec![compute_hash_key("a.jpg", ts())]);
        let key = compute_hash_key("a.jpg", ts());
        registry.release(&key);
        assert_eq!(registry.assign_unique("a.jpg", ts()), key);
    }

    #[test]
    fn test_chain_contains_bumped_keys() {
        let mut registry = HashKeyRegistry::default();
        let _first = registry.assign_unique("a.jpg", ts());
        let second = registry.assign_unique("a.jpg", ts());

        assert!(registry.chain_contains("a.jpg", ts(), &second));
        assert!(!registry.chain_contains("b.jpg", ts(), &second));
        assert!(!registry.chain_contains(
            "a.jpg",
            ts(),
            &compute_hash_key("a.jpg", ts() + Duration::seconds(5))
        ));
    }
}
