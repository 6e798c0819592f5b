//! Remote inventory: the full set of object keys under a prefix.
//!
//! The listing follows continuation tokens until the store reports the last
//! page, and the whole set is materialized before any upload decision is
//! made. A failure on any page fails the listing; partial sets are never
//! returned.

use std::collections::HashSet;

use bucket_backup_sync_models::RetryPolicy;

use crate::retry::with_retry;
use crate::{ObjectStore, SyncError};

/// Immutable snapshot of the keys that existed under a prefix when it was
/// listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteKeySet {
    keys: HashSet<String>,
}

impl RemoteKeySet {
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl FromIterator<String> for RemoteKeySet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Lists every key under `prefix`, following pagination to the end.
///
/// # Errors
///
/// Returns [`SyncError::List`] if any page fails after retries.
pub async fn remote_key_set(
    store: &dyn ObjectStore,
    prefix: &str,
    retry: &RetryPolicy,
) -> Result<RemoteKeySet, SyncError> {
    let mut keys = HashSet::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0u64;

    loop {
        let what = format!("list {prefix:?} page {}", pages + 1);
        let page = with_retry(retry, &what, || {
            store.list_page(prefix, continuation.as_deref())
        })
        .await
        .map_err(|source| SyncError::List {
            prefix: prefix.to_string(),
            source,
        })?;

        pages += 1;
        keys.extend(page.keys);

        match page.next {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    log::debug!("Listed {} keys under {prefix:?} in {pages} page(s)", keys.len());

    Ok(RemoteKeySet { keys })
}
