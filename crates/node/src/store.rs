//! Durable state store.
//!
//! All operations are synchronous blocking I/O; the service serializes access
//! behind its single-writer mutex. Writes either fully commit or leave the
//! store unchanged, and read-after-write within the process is strongly
//! consistent.
//!
//! The store is one directory with four logical namespaces, mapped onto
//! RocksDB column families:
//!
//! - `fsm`  - round id → serialized FSM snapshot
//! - `ops`  - sequence-prefixed operation id → pending operation
//! - `meta` - offset cursor, operation sequence counter
//! - `sig`  - `<round>/<signing_id>` → signing archive entry

use custodia_types::{DkgRoundId, Operation, SigningEntry, SigningId};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const CF_FSM: &str = "fsm";
const CF_OPS: &str = "ops";
const CF_META: &str = "meta";
const CF_SIG: &str = "sig";
const ALL_CFS: [&str; 4] = [CF_FSM, CF_OPS, CF_META, CF_SIG];

const META_OFFSET: &[u8] = b"offset";
const META_OPS_SEQ: &[u8] = b"ops_seq";

/// Errors from the store. Commit failures are fatal for the current tick: the
/// cursor is not advanced and the operator is expected to intervene.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt record under {namespace}: {reason}")]
    Corrupt {
        namespace: &'static str,
        reason: String,
    },
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt {
            namespace: "json",
            reason: e.to_string(),
        }
    }
}

/// One transactional multi-key commit.
///
/// Everything a processed message (or answered operation) changes lands in a
/// single atomic batch: FSM snapshot, operation puts and deletes, cursor
/// advance, archive writes. A crash can never leave the store split between
/// old and new state.
#[derive(Debug, Default)]
pub struct RoundCommit {
    pub fsm: Option<(DkgRoundId, Vec<u8>)>,
    pub put_operations: Vec<Operation>,
    pub delete_operations: Vec<Uuid>,
    /// Delete every pending operation of this round (the round aborted).
    pub cancel_round_operations: Option<DkgRoundId>,
    pub set_offset: Option<u64>,
    pub archive: Vec<SigningEntry>,
}

impl RoundCommit {
    pub fn offset_only(offset: u64) -> Self {
        Self {
            set_offset: Some(offset),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fsm.is_none()
            && self.put_operations.is_empty()
            && self.delete_operations.is_empty()
            && self.cancel_round_operations.is_none()
            && self.set_offset.is_none()
            && self.archive.is_empty()
    }
}

/// Narrow capability interface over the durable state.
///
/// Tests substitute [`MemoryStore`]; production uses [`RocksStore`].
pub trait NodeStore: Send {
    fn load_fsm(&self, round_id: &DkgRoundId) -> Result<Option<Vec<u8>>, StoreError>;
    fn list_rounds(&self) -> Result<Vec<DkgRoundId>, StoreError>;

    /// Pending operations in insertion order.
    fn get_operations(&self) -> Result<Vec<Operation>, StoreError>;
    fn get_operation(&self, id: &Uuid) -> Result<Option<Operation>, StoreError>;

    fn get_offset(&self) -> Result<u64, StoreError>;

    fn archive_get(
        &self,
        round_id: &DkgRoundId,
        signing_id: &SigningId,
    ) -> Result<Option<SigningEntry>, StoreError>;
    fn archive_list(&self, round_id: &DkgRoundId) -> Result<Vec<SigningEntry>, StoreError>;

    /// Apply one atomic multi-key commit.
    fn commit(&mut self, commit: RoundCommit) -> Result<(), StoreError>;

    /// Fork into a fresh store at `new_location` for the reset path.
    ///
    /// The new store starts with an empty FSM namespace, an empty operation
    /// queue, and the cursor at zero, so replay rebuilds every round while
    /// honoring the log's ignore sets. The signature archive is carried over:
    /// completed signings stay auditable across resets. The old store is not
    /// touched; the caller decides when to rebind.
    fn new_state_from_old(&self, new_location: &Path) -> Result<Box<dyn NodeStore>, StoreError>;

    /// Where this store lives, for diagnostics and rebind bookkeeping.
    fn location(&self) -> String;
}

// ─── RocksDB implementation ─────────────────────────────────────────────────

/// RocksDB-backed store for production use.
pub struct RocksStore {
    db: DB,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create the store at `path`, with all column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();
        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)?;
        Ok(Self {
            db,
            path: path.as_ref().to_path_buf(),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family {name} not found")))
    }

    fn meta_u64(&self, key: &[u8]) -> Result<u64, StoreError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StoreError::Corrupt {
                    namespace: CF_META,
                    reason: "counter is not 8 bytes".into(),
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Operations are stored under a sequence-prefixed key so iteration
    /// yields insertion order; lookups by id scan the (small) queue.
    fn ops_entries(&self) -> Result<Vec<(Vec<u8>, Operation)>, StoreError> {
        let cf = self.cf(CF_OPS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (key, value) = item?;
            let op: Operation = serde_json::from_slice(&value)?;
            out.push((key.to_vec(), op));
        }
        Ok(out)
    }
}

impl NodeStore for RocksStore {
    fn load_fsm(&self, round_id: &DkgRoundId) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_FSM)?;
        Ok(self.db.get_cf(cf, round_id.as_str().as_bytes())?)
    }

    fn list_rounds(&self) -> Result<Vec<DkgRoundId>, StoreError> {
        let cf = self.cf(CF_FSM)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item?;
            let id = String::from_utf8(key.to_vec()).map_err(|_| StoreError::Corrupt {
                namespace: CF_FSM,
                reason: "round id is not utf-8".into(),
            })?;
            out.push(DkgRoundId::new(id));
        }
        Ok(out)
    }

    fn get_operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.ops_entries()?.into_iter().map(|(_, op)| op).collect())
    }

    fn get_operation(&self, id: &Uuid) -> Result<Option<Operation>, StoreError> {
        Ok(self
            .ops_entries()?
            .into_iter()
            .map(|(_, op)| op)
            .find(|op| &op.id == id))
    }

    fn get_offset(&self) -> Result<u64, StoreError> {
        self.meta_u64(META_OFFSET)
    }

    fn archive_get(
        &self,
        round_id: &DkgRoundId,
        signing_id: &SigningId,
    ) -> Result<Option<SigningEntry>, StoreError> {
        let cf = self.cf(CF_SIG)?;
        let key = SigningEntry::archive_key(round_id, signing_id);
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn archive_list(&self, round_id: &DkgRoundId) -> Result<Vec<SigningEntry>, StoreError> {
        let cf = self.cf(CF_SIG)?;
        let prefix = format!("{round_id}/");
        let mut out = Vec::new();
        let mode = rocksdb::IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward);
        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    fn commit(&mut self, commit: RoundCommit) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        let cf_fsm = self.cf(CF_FSM)?;
        let cf_ops = self.cf(CF_OPS)?;
        let cf_meta = self.cf(CF_META)?;
        let cf_sig = self.cf(CF_SIG)?;

        if let Some((round_id, snapshot)) = &commit.fsm {
            batch.put_cf(cf_fsm, round_id.as_str().as_bytes(), snapshot);
        }

        let existing = self.ops_entries()?;
        let mut seq = self.meta_u64(META_OPS_SEQ)?;
        for op in &commit.put_operations {
            // Re-queuing the same operation id replaces it in place.
            if let Some((key, _)) = existing.iter().find(|(_, e)| e.id == op.id) {
                batch.put_cf(cf_ops, key, serde_json::to_vec(op)?);
                continue;
            }
            let key = format!("{seq:020}:{}", op.id);
            seq += 1;
            batch.put_cf(cf_ops, key.as_bytes(), serde_json::to_vec(op)?);
        }
        batch.put_cf(cf_meta, META_OPS_SEQ, seq.to_be_bytes());

        for id in &commit.delete_operations {
            if let Some((key, _)) = existing.iter().find(|(_, op)| &op.id == id) {
                batch.delete_cf(cf_ops, key);
            }
        }
        if let Some(round_id) = &commit.cancel_round_operations {
            for (key, op) in &existing {
                if &op.round_id == round_id {
                    batch.delete_cf(cf_ops, key);
                }
            }
        }

        if let Some(offset) = commit.set_offset {
            batch.put_cf(cf_meta, META_OFFSET, offset.to_be_bytes());
        }

        for entry in &commit.archive {
            let key = SigningEntry::archive_key(&entry.round_id, &entry.signing_id);
            batch.put_cf(cf_sig, key.as_bytes(), serde_json::to_vec(entry)?);
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn new_state_from_old(&self, new_location: &Path) -> Result<Box<dyn NodeStore>, StoreError> {
        let mut fresh = RocksStore::open(new_location)?;
        let cf_src = self.cf(CF_SIG)?;
        let mut archive = Vec::new();
        for item in self.db.iterator_cf(cf_src, rocksdb::IteratorMode::Start) {
            let (_, value) = item?;
            archive.push(serde_json::from_slice(&value)?);
        }
        fresh.commit(RoundCommit {
            archive,
            ..Default::default()
        })?;
        Ok(Box::new(fresh))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ─── In-memory implementation ───────────────────────────────────────────────

/// In-memory store with the same commit semantics, for tests and the cluster
/// simulation.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    fsm: BTreeMap<String, Vec<u8>>,
    ops: Vec<Operation>,
    offset: u64,
    sig: BTreeMap<String, SigningEntry>,
    location: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            location: "memory".into(),
            ..Default::default()
        }
    }
}

impl NodeStore for MemoryStore {
    fn load_fsm(&self, round_id: &DkgRoundId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.fsm.get(round_id.as_str()).cloned())
    }

    fn list_rounds(&self) -> Result<Vec<DkgRoundId>, StoreError> {
        Ok(self.fsm.keys().cloned().map(DkgRoundId::new).collect())
    }

    fn get_operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.ops.clone())
    }

    fn get_operation(&self, id: &Uuid) -> Result<Option<Operation>, StoreError> {
        Ok(self.ops.iter().find(|op| &op.id == id).cloned())
    }

    fn get_offset(&self) -> Result<u64, StoreError> {
        Ok(self.offset)
    }

    fn archive_get(
        &self,
        round_id: &DkgRoundId,
        signing_id: &SigningId,
    ) -> Result<Option<SigningEntry>, StoreError> {
        Ok(self
            .sig
            .get(&SigningEntry::archive_key(round_id, signing_id))
            .cloned())
    }

    fn archive_list(&self, round_id: &DkgRoundId) -> Result<Vec<SigningEntry>, StoreError> {
        let prefix = format!("{round_id}/");
        Ok(self
            .sig
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn commit(&mut self, commit: RoundCommit) -> Result<(), StoreError> {
        if let Some((round_id, snapshot)) = commit.fsm {
            self.fsm.insert(round_id.as_str().to_owned(), snapshot);
        }
        for op in commit.put_operations {
            if let Some(existing) = self.ops.iter_mut().find(|e| e.id == op.id) {
                *existing = op;
            } else {
                self.ops.push(op);
            }
        }
        self.ops
            .retain(|op| !commit.delete_operations.contains(&op.id));
        if let Some(round_id) = commit.cancel_round_operations {
            self.ops.retain(|op| op.round_id != round_id);
        }
        if let Some(offset) = commit.set_offset {
            self.offset = offset;
        }
        for entry in commit.archive {
            self.sig.insert(
                SigningEntry::archive_key(&entry.round_id, &entry.signing_id),
                entry,
            );
        }
        Ok(())
    }

    fn new_state_from_old(&self, new_location: &Path) -> Result<Box<dyn NodeStore>, StoreError> {
        Ok(Box::new(MemoryStore {
            sig: self.sig.clone(),
            location: new_location.display().to_string(),
            ..Default::default()
        }))
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}
