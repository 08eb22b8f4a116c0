//! In-memory blob storage with fault injection and fetch gates.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use hushline_client::{Storage, StorageError};
use hushline_proto::RemoteUrl;
use tokio::sync::watch;

/// Blob storage backed by a `HashMap`.
///
/// Fetches can be held at a gate so that concurrent readers provably overlap:
/// [`MemoryStorage::close_gate`] makes every fetch wait after it has been
/// counted, [`MemoryStorage::wait_for_fetches`] observes that, and
/// [`MemoryStorage::open_gate`] lets them finish.
pub struct MemoryStorage {
    blobs: Mutex<HashMap<RemoteUrl, Vec<u8>>>,
    uploads: AtomicUsize,
    fetches: watch::Sender<usize>,
    gate: watch::Sender<bool>,
    failing_uploads: AtomicUsize,
    fetch_outage: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            fetches: watch::Sender::new(0),
            gate: watch::Sender::new(true),
            failing_uploads: AtomicUsize::new(0),
            fetch_outage: AtomicBool::new(false),
        }
    }
}

impl MemoryStorage {
    /// Empty storage with an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes under a chosen URL, bypassing upload counting.
    pub fn insert(&self, url: impl Into<RemoteUrl>, bytes: Vec<u8>) {
        self.lock().insert(url.into(), bytes);
    }

    /// Raw stored bytes, as a server would see them.
    pub fn blob(&self, url: &RemoteUrl) -> Option<Vec<u8>> {
        self.lock().get(url).cloned()
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.lock().len()
    }

    /// Completed uploads.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Fetches started, including ones held at the gate.
    pub fn fetch_count(&self) -> usize {
        *self.fetches.borrow()
    }

    /// Fail the next `count` uploads with `Unavailable`.
    pub fn fail_next_uploads(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    /// Make every fetch fail with `Unavailable` until cleared.
    pub fn set_fetch_outage(&self, outage: bool) {
        self.fetch_outage.store(outage, Ordering::SeqCst);
    }

    /// Hold subsequent fetches until [`MemoryStorage::open_gate`].
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    /// Release held fetches.
    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Wait until at least `count` fetches have started.
    pub async fn wait_for_fetches(&self, count: usize) {
        let mut started = self.fetches.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = started.wait_for(|started| *started >= count).await;
    }

    fn take_upload_failure(&self) -> bool {
        self.failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RemoteUrl, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    async fn upload(&self, bytes: Vec<u8>) -> Result<RemoteUrl, StorageError> {
        if self.take_upload_failure() {
            tracing::debug!("injected upload failure");
            return Err(StorageError::Unavailable("injected upload failure".to_owned()));
        }

        let id = self.uploads.fetch_add(1, Ordering::SeqCst);
        let url = RemoteUrl::new(format!("sim://blobs/{id}"));
        self.lock().insert(url.clone(), bytes);
        Ok(url)
    }

    async fn fetch(&self, url: &RemoteUrl) -> Result<Vec<u8>, StorageError> {
        self.fetches.send_modify(|started| *started += 1);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if self.fetch_outage.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected fetch outage".to_owned()));
        }

        self.blob(url).ok_or_else(|| StorageError::NotFound(url.clone()))
    }
}
