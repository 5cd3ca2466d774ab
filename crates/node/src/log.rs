//! Log transport adapter.
//!
//! The shared append-only log is the only channel between nodes. The adapter
//! is a pull interface: `fetch` returns messages in increasing offset order
//! starting at a cursor, `append` returns once the log has durably accepted
//! the record. The adapter may re-deliver; the ingestion loop treats the
//! offset as the idempotency key.
//!
//! Offsets are assigned by the log. Because the message signature covers the
//! offset, publishing is a reserve-then-append pair (`next_offset` then
//! `append`) executed under the node's single-writer mutex.

use custodia_types::LogMessage;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// How many messages one `fetch` returns at most.
pub const FETCH_BATCH: usize = 256;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt log record: {0}")]
    Corrupt(String),
    #[error("append at offset {got}, log is at {expected}")]
    OffsetMismatch { expected: u64, got: u64 },
}

/// Narrow capability interface onto the shared log.
pub trait MessageLog: Send + Sync {
    /// The offset the next appended message will receive.
    fn next_offset(&self) -> Result<u64, LogError>;

    /// Messages with `offset >= from_offset`, ascending, bounded by
    /// [`FETCH_BATCH`]. May be empty; may re-deliver.
    fn fetch(&self, from_offset: u64) -> Result<Vec<LogMessage>, LogError>;

    /// Durably append one signed message. The message's offset must match
    /// the reserved one.
    fn append(&self, message: LogMessage) -> Result<u64, LogError>;

    /// Record messages to skip on replay, by id or (when `use_offset`) by
    /// offset. Survives restarts for durable adapters.
    fn ignore_messages(&self, messages: &[String], use_offset: bool) -> Result<(), LogError>;

    /// Whether a fetched message is in the ignore sets.
    fn is_ignored(&self, message: &LogMessage) -> bool;
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
struct IgnoreSets {
    ids: BTreeSet<String>,
    offsets: BTreeSet<u64>,
}

impl IgnoreSets {
    fn add(&mut self, messages: &[String], use_offset: bool) -> Result<(), LogError> {
        if use_offset {
            for raw in messages {
                let offset: u64 = raw
                    .parse()
                    .map_err(|_| LogError::Corrupt(format!("not an offset: {raw}")))?;
                self.offsets.insert(offset);
            }
        } else {
            self.ids.extend(messages.iter().cloned());
        }
        Ok(())
    }

    fn contains(&self, message: &LogMessage) -> bool {
        self.offsets.contains(&message.offset) || self.ids.contains(&message.id.to_string())
    }
}

// ─── Shared in-memory log ───────────────────────────────────────────────────

/// The log itself, shared by every node of a simulated cluster.
#[derive(Debug, Default)]
pub struct SharedMemoryLog {
    messages: Mutex<Vec<LogMessage>>,
}

impl SharedMemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the whole log, for replay tests.
    pub fn all_messages(&self) -> Vec<LogMessage> {
        self.messages.lock().clone()
    }
}

/// One node's adapter onto a [`SharedMemoryLog`]. Ignore sets are per node:
/// each operator resets their own replica.
#[derive(Debug)]
pub struct MemoryLog {
    shared: Arc<SharedMemoryLog>,
    ignored: Mutex<IgnoreSets>,
}

impl MemoryLog {
    pub fn attach(shared: Arc<SharedMemoryLog>) -> Self {
        Self {
            shared,
            ignored: Mutex::new(IgnoreSets::default()),
        }
    }
}

impl MessageLog for MemoryLog {
    fn next_offset(&self) -> Result<u64, LogError> {
        Ok(self.shared.messages.lock().len() as u64)
    }

    fn fetch(&self, from_offset: u64) -> Result<Vec<LogMessage>, LogError> {
        let messages = self.shared.messages.lock();
        let start = (from_offset as usize).min(messages.len());
        Ok(messages[start..]
            .iter()
            .take(FETCH_BATCH)
            .cloned()
            .collect())
    }

    fn append(&self, message: LogMessage) -> Result<u64, LogError> {
        let mut messages = self.shared.messages.lock();
        let expected = messages.len() as u64;
        if message.offset != expected {
            return Err(LogError::OffsetMismatch {
                expected,
                got: message.offset,
            });
        }
        messages.push(message);
        Ok(expected)
    }

    fn ignore_messages(&self, messages: &[String], use_offset: bool) -> Result<(), LogError> {
        self.ignored.lock().add(messages, use_offset)
    }

    fn is_ignored(&self, message: &LogMessage) -> bool {
        self.ignored.lock().contains(message)
    }
}

// ─── Durable file-backed log ────────────────────────────────────────────────

struct FileLogInner {
    messages: Vec<LogMessage>,
    file: File,
    ignored: IgnoreSets,
}

/// Append-only JSON-lines segment, fsynced before `append` returns.
///
/// This is the durable local implementation the binary ships with; a
/// Kafka-style transport plugs in behind the same [`MessageLog`] trait.
pub struct FileLog {
    segment_path: PathBuf,
    ignore_path: PathBuf,
    inner: Mutex<FileLogInner>,
}

impl FileLog {
    pub fn open(segment_path: impl AsRef<Path>) -> Result<Self, LogError> {
        let segment_path = segment_path.as_ref().to_path_buf();
        if let Some(parent) = segment_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut messages = Vec::new();
        if segment_path.exists() {
            let reader = BufReader::new(File::open(&segment_path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let message: LogMessage = serde_json::from_str(&line).map_err(|e| {
                    LogError::Corrupt(format!("segment line {}: {e}", line_no + 1))
                })?;
                if message.offset != messages.len() as u64 {
                    return Err(LogError::Corrupt(format!(
                        "segment line {}: offset {} out of order",
                        line_no + 1,
                        message.offset
                    )));
                }
                messages.push(message);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment_path)?;

        let ignore_path = segment_path.with_extension("ignore.json");
        let ignored = if ignore_path.exists() {
            serde_json::from_slice(&std::fs::read(&ignore_path)?)
                .map_err(|e| LogError::Corrupt(format!("ignore sidecar: {e}")))?
        } else {
            IgnoreSets::default()
        };

        Ok(Self {
            segment_path,
            ignore_path,
            inner: Mutex::new(FileLogInner {
                messages,
                file,
                ignored,
            }),
        })
    }

    pub fn segment_path(&self) -> &Path {
        &self.segment_path
    }
}

impl MessageLog for FileLog {
    fn next_offset(&self) -> Result<u64, LogError> {
        Ok(self.inner.lock().messages.len() as u64)
    }

    fn fetch(&self, from_offset: u64) -> Result<Vec<LogMessage>, LogError> {
        let inner = self.inner.lock();
        let start = (from_offset as usize).min(inner.messages.len());
        Ok(inner.messages[start..]
            .iter()
            .take(FETCH_BATCH)
            .cloned()
            .collect())
    }

    fn append(&self, message: LogMessage) -> Result<u64, LogError> {
        let mut inner = self.inner.lock();
        let expected = inner.messages.len() as u64;
        if message.offset != expected {
            return Err(LogError::OffsetMismatch {
                expected,
                got: message.offset,
            });
        }
        let mut line = serde_json::to_vec(&message)
            .map_err(|e| LogError::Corrupt(format!("unserializable message: {e}")))?;
        line.push(b'\n');
        inner.file.write_all(&line)?;
        inner.file.sync_data()?;
        inner.messages.push(message);
        Ok(expected)
    }

    fn ignore_messages(&self, messages: &[String], use_offset: bool) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        inner.ignored.add(messages, use_offset)?;
        let bytes = serde_json::to_vec(&inner.ignored)
            .map_err(|e| LogError::Corrupt(format!("unserializable ignore sets: {e}")))?;
        std::fs::write(&self.ignore_path, bytes)?;
        Ok(())
    }

    fn is_ignored(&self, message: &LogMessage) -> bool {
        self.inner.lock().ignored.contains(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_types::{DkgRoundId, EventKind, ParticipantAddr};
    use uuid::Uuid;

    fn message(offset: u64) -> LogMessage {
        LogMessage {
            id: Uuid::from_u128(offset as u128 + 1),
            dkg_round_id: DkgRoundId::from("round-1"),
            offset,
            event: EventKind::ProposalConfirm,
            data: vec![],
            sender_addr: ParticipantAddr::from_verify_key(&[1u8; 32]),
            recipient_addr: None,
            signature: vec![0u8; 64],
        }
    }

    fn exercise_log(log: &dyn MessageLog) {
        assert_eq!(log.next_offset().unwrap(), 0);
        assert!(log.fetch(0).unwrap().is_empty());

        for offset in 0..3 {
            assert_eq!(log.append(message(offset)).unwrap(), offset);
        }
        assert_eq!(log.next_offset().unwrap(), 3);
        assert_eq!(log.fetch(0).unwrap().len(), 3);
        assert_eq!(log.fetch(2).unwrap().len(), 1);
        assert_eq!(log.fetch(2).unwrap()[0].offset, 2);
        assert!(log.fetch(10).unwrap().is_empty());

        // Appending with a stale offset is refused.
        assert!(matches!(
            log.append(message(1)),
            Err(LogError::OffsetMismatch { .. })
        ));

        // Ignore by offset and by id.
        log.ignore_messages(&["1".into()], true).unwrap();
        assert!(log.is_ignored(&message(1)));
        assert!(!log.is_ignored(&message(2)));
        log.ignore_messages(&[message(2).id.to_string()], false)
            .unwrap();
        assert!(log.is_ignored(&message(2)));
    }

    #[test]
    fn memory_log_semantics() {
        let shared = SharedMemoryLog::new();
        let log = MemoryLog::attach(shared);
        exercise_log(&log);
    }

    #[test]
    fn file_log_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::open(dir.path().join("segment.jsonl")).unwrap();
        exercise_log(&log);
    }

    #[test]
    fn file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.jsonl");
        {
            let log = FileLog::open(&path).unwrap();
            log.append(message(0)).unwrap();
            log.append(message(1)).unwrap();
            log.ignore_messages(&["0".into()], true).unwrap();
        }
        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.next_offset().unwrap(), 2);
        assert_eq!(log.fetch(0).unwrap().len(), 2);
        assert!(log.is_ignored(&message(0)));
    }

    #[test]
    fn memory_log_ignore_sets_are_per_node() {
        let shared = SharedMemoryLog::new();
        let a = MemoryLog::attach(shared.clone());
        let b = MemoryLog::attach(shared);
        a.append(message(0)).unwrap();
        a.ignore_messages(&["0".into()], true).unwrap();
        assert!(a.is_ignored(&message(0)));
        assert!(!b.is_ignored(&message(0)));
    }
}
