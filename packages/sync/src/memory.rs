//! In-memory doubles for exercising the engine without a network or a disk.
//!
//! [`MemoryStore`] paginates listings with a configurable page size, records
//! every put, and can be told to fail a window of listing or upload calls.
//! [`MemoryTree`] serves a synthetic local tree.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::local::{LocalFiles, LocalTree};
use crate::{ListPage, ObjectStore, StoreError, SyncError, UploadBody};

/// Default listing page size, matching S3's `ListObjectsV2` maximum.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Fails calls numbered `skip + 1 ..= skip + count` (1-based).
#[derive(Debug, Clone, Copy, Default)]
struct FailureWindow {
    skip: u64,
    count: u64,
}

impl FailureWindow {
    const fn hits(self, call: u64) -> bool {
        call > self.skip && call <= self.skip + self.count
    }
}

/// Bucket contents held in a sorted map.
#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    puts: Mutex<Vec<String>>,
    page_size: usize,
    list_calls: AtomicU64,
    put_calls: AtomicU64,
    list_failures: Mutex<FailureWindow>,
    put_failures: Mutex<FailureWindow>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose listings return at most `page_size` keys per page.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            puts: Mutex::new(Vec::new()),
            page_size: page_size.max(1),
            list_calls: AtomicU64::new(0),
            put_calls: AtomicU64::new(0),
            list_failures: Mutex::new(FailureWindow::default()),
            put_failures: Mutex::new(FailureWindow::default()),
        }
    }

    /// Stores an object directly, without recording a put.
    pub fn insert(&self, key: &str, contents: Vec<u8>) {
        lock(&self.objects).insert(key.to_string(), contents);
    }

    /// Contents of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).cloned()
    }

    /// Every stored key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Keys of successful puts, in completion order.
    #[must_use]
    pub fn puts(&self) -> Vec<String> {
        lock(&self.puts).clone()
    }

    /// Number of `list_page` calls, including failed ones.
    #[must_use]
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `put_object` calls, including failed ones.
    #[must_use]
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Lets `skip` further listing calls succeed, then fails the next
    /// `count`.
    pub fn fail_list_calls_after(&self, skip: u64, count: u64) {
        *lock(&self.list_failures) = FailureWindow {
            skip: self.list_calls() + skip,
            count,
        };
    }

    /// Lets `skip` further uploads succeed, then fails the next `count`.
    pub fn fail_put_calls_after(&self, skip: u64, count: u64) {
        *lock(&self.put_failures) = FailureWindow {
            skip: self.put_calls() + skip,
            count,
        };
    }

    /// Clears the put log, keeping the stored objects.
    pub fn reset_puts(&self) {
        lock(&self.puts).clear();
        self.put_calls.store(0, Ordering::SeqCst);
        *lock(&self.put_failures) = FailureWindow::default();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if lock(&self.list_failures).hits(call) {
            return Err(format!("injected listing failure on call {call}").into());
        }

        let objects = lock(&self.objects);
        let mut matching = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| continuation.is_none_or(|after| key.as_str() > after));

        let keys: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let next = if matching.next().is_some() {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, next })
    }

    async fn put_object(&self, key: &str, body: &UploadBody) -> Result<(), StoreError> {
        let call = self.put_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if lock(&self.put_failures).hits(call) {
            return Err(format!("injected upload failure for {key}").into());
        }

        let contents = match body {
            UploadBody::File(path) => tokio::fs::read(path).await?,
            UploadBody::Bytes(bytes) => bytes.clone(),
        };

        lock(&self.objects).insert(key.to_string(), contents);
        lock(&self.puts).push(key.to_string());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory tree of `relative path -> contents`.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file.
    #[must_use]
    pub fn with_file(mut self, relative: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(relative.to_string(), contents.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl LocalTree for MemoryTree {
    fn files(&self) -> Result<LocalFiles<'_>, SyncError> {
        Ok(Box::new(self.files.keys().cloned().map(Ok)))
    }

    fn body(&self, relative: &str) -> UploadBody {
        UploadBody::Bytes(self.files.get(relative).cloned().unwrap_or_default())
    }
}
