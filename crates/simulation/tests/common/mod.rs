//! Shared test plumbing.

use custodia_node::{MemoryStore, NodeStore, RoundCommit, StoreError};
use custodia_types::{DkgRoundId, Operation, SigningEntry, SigningId};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A store handle the test keeps across simulated restarts, with a commit
/// failure injection point for crash tests.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<MemoryStore>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail, as if the process died mid-write.
    #[allow(dead_code)]
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl NodeStore for SharedStore {
    fn load_fsm(&self, round_id: &DkgRoundId) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.lock().load_fsm(round_id)
    }

    fn list_rounds(&self) -> Result<Vec<DkgRoundId>, StoreError> {
        self.inner.lock().list_rounds()
    }

    fn get_operations(&self) -> Result<Vec<Operation>, StoreError> {
        self.inner.lock().get_operations()
    }

    fn get_operation(&self, id: &Uuid) -> Result<Option<Operation>, StoreError> {
        self.inner.lock().get_operation(id)
    }

    fn get_offset(&self) -> Result<u64, StoreError> {
        self.inner.lock().get_offset()
    }

    fn archive_get(
        &self,
        round_id: &DkgRoundId,
        signing_id: &SigningId,
    ) -> Result<Option<SigningEntry>, StoreError> {
        self.inner.lock().archive_get(round_id, signing_id)
    }

    fn archive_list(&self, round_id: &DkgRoundId) -> Result<Vec<SigningEntry>, StoreError> {
        self.inner.lock().archive_list(round_id)
    }

    fn commit(&mut self, commit: RoundCommit) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected commit failure".into()));
        }
        self.inner.lock().commit(commit)
    }

    fn new_state_from_old(&self, new_location: &Path) -> Result<Box<dyn NodeStore>, StoreError> {
        self.inner.lock().new_state_from_old(new_location)
    }

    fn location(&self) -> String {
        self.inner.lock().location()
    }
}
