//! Audit persistence — the append/query contract and its backends
//!
//! The trail buffers in memory and hands batches to an `AuditStore`.
//! Backends only need ordered append and filtered reads; the hash chain
//! is re-derivable from the stored fields alone, independent of the
//! storage engine.

use crate::audit::AuditEntry;
use crate::error::{Result, SecurityError};
use crate::event::{EventType, Severity};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Filters for audit queries
///
/// All fields are conjunctive; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Match a single event type
    pub event_type: Option<EventType>,

    /// Match events concerning this actor
    pub actor_id: Option<String>,

    /// Match events at or above this severity
    pub min_severity: Option<Severity>,

    /// Inclusive lower bound on event time
    pub from_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Inclusive upper bound on event time
    pub to_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Maximum entries returned (0 means unlimited)
    pub limit: usize,
}

impl AuditQuery {
    /// Whether an entry passes every set filter
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(t) = self.event_type {
            if entry.event.event_type != t {
                return false;
            }
        }
        if let Some(actor) = &self.actor_id {
            if entry.event.actor_id.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if entry.event.severity < min {
                return false;
            }
        }
        if let Some(from) = self.from_time {
            if entry.event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to_time {
            if entry.event.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Persistent store contract for audit entries
///
/// Implementations must preserve insertion order by sequence number and
/// never rewrite an entry once appended.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a batch of entries in sequence order
    async fn append_batch(&self, entries: &[AuditEntry]) -> Result<()>;

    /// Filtered query, ordered by sequence number descending
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>>;

    /// Load entries with sequence numbers in `[from, to]`, ascending
    async fn load_range(&self, from: u64, to: u64) -> Result<Vec<AuditEntry>>;

    /// The last stored entry, if any
    async fn last_entry(&self) -> Result<Option<AuditEntry>>;

    /// Number of live (non-archived) entries
    async fn len(&self) -> Result<usize>;

    /// Move entries older than `cutoff` into a compressed archive segment
    ///
    /// Returns the number of entries archived. Never recomputes hashes.
    async fn archive_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<usize>;

    /// Store name (e.g. "memory", "file")
    fn name(&self) -> &str;
}

/// In-memory audit store for testing and single-process use
///
/// Entries live in a `Vec` ordered by sequence number. Archived entries
/// are dropped from the live view but counted.
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
    archived: RwLock<usize>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            archived: RwLock::new(0),
        }
    }

    /// Number of entries moved to archive so far
    pub async fn archived_count(&self) -> usize {
        *self.archived.read().await
    }

    /// Overwrite a stored entry in place — test hook for tamper scenarios
    #[doc(hidden)]
    pub async fn tamper(&self, index: usize, mutate: impl FnOnce(&mut AuditEntry)) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(index) {
            mutate(entry);
        }
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append_batch(&self, batch: &[AuditEntry]) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.extend_from_slice(batch);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        let mut result: Vec<AuditEntry> = entries
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        if query.limit > 0 {
            result.truncate(query.limit);
        }
        Ok(result)
    }

    async fn load_range(&self, from: u64, to: u64) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.sequence_number >= from && e.sequence_number <= to)
            .cloned()
            .collect())
    }

    async fn last_entry(&self) -> Result<Option<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.last().cloned())
    }

    async fn len(&self) -> Result<usize> {
        let entries = self.entries.read().await;
        Ok(entries.len())
    }

    async fn archive_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.event.timestamp >= cutoff);
        let moved = before - entries.len();
        *self.archived.write().await += moved;
        Ok(moved)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Append-only JSONL audit store
///
/// One entry per line in `audit.jsonl`; compaction rewrites the live file
/// and gzips old entries into `archive-<timestamp>.jsonl.gz` segments.
/// File I/O happens only at flush/compaction boundaries, never on the
/// request path.
pub struct FileAuditStore {
    dir: PathBuf,
    /// Serializes all file access; readers and the compactor share it.
    io_lock: RwLock<()>,
}

impl FileAuditStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SecurityError::Audit(format!(
                "Failed to create audit directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            io_lock: RwLock::new(()),
        })
    }

    fn live_path(&self) -> PathBuf {
        self.dir.join("audit.jsonl")
    }

    fn read_live(&self) -> Result<Vec<AuditEntry>> {
        let path = self.live_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SecurityError::Audit(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }

    fn write_archive(&self, entries: &[AuditEntry], path: &Path) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            encoder.write_all(line.as_bytes()).map_err(|e| {
                SecurityError::Audit(format!("Failed to compress archive segment: {}", e))
            })?;
            encoder.write_all(b"\n").map_err(|e| {
                SecurityError::Audit(format!("Failed to compress archive segment: {}", e))
            })?;
        }
        let compressed = encoder.finish().map_err(|e| {
            SecurityError::Audit(format!("Failed to finish archive segment: {}", e))
        })?;
        std::fs::write(path, compressed).map_err(|e| {
            SecurityError::Audit(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn append_batch(&self, batch: &[AuditEntry]) -> Result<()> {
        let _guard = self.io_lock.write().await;
        let mut lines = String::new();
        for entry in batch {
            lines.push_str(&serde_json::to_string(entry)?);
            lines.push('\n');
        }
        use std::io::Write as _;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path())
            .map_err(|e| {
                SecurityError::Audit(format!(
                    "Failed to open {}: {}",
                    self.live_path().display(),
                    e
                ))
            })?;
        file.write_all(lines.as_bytes()).map_err(|e| {
            SecurityError::Audit(format!(
                "Failed to append to {}: {}",
                self.live_path().display(),
                e
            ))
        })?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let _guard = self.io_lock.read().await;
        let entries = self.read_live()?;
        let mut result: Vec<AuditEntry> = entries
            .into_iter()
            .rev()
            .filter(|e| query.matches(e))
            .collect();
        if query.limit > 0 {
            result.truncate(query.limit);
        }
        Ok(result)
    }

    async fn load_range(&self, from: u64, to: u64) -> Result<Vec<AuditEntry>> {
        let _guard = self.io_lock.read().await;
        let entries = self.read_live()?;
        Ok(entries
            .into_iter()
            .filter(|e| e.sequence_number >= from && e.sequence_number <= to)
            .collect())
    }

    async fn last_entry(&self) -> Result<Option<AuditEntry>> {
        let _guard = self.io_lock.read().await;
        let entries = self.read_live()?;
        Ok(entries.into_iter().last())
    }

    async fn len(&self) -> Result<usize> {
        let _guard = self.io_lock.read().await;
        Ok(self.read_live()?.len())
    }

    async fn archive_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let _guard = self.io_lock.write().await;
        let entries = self.read_live()?;
        let (old, live): (Vec<AuditEntry>, Vec<AuditEntry>) =
            entries.into_iter().partition(|e| e.event.timestamp < cutoff);

        if old.is_empty() {
            return Ok(0);
        }

        let archive_path = self
            .dir
            .join(format!("archive-{}.jsonl.gz", chrono::Utc::now().timestamp()));
        self.write_archive(&old, &archive_path)?;

        // Rewrite the live file atomically
        let mut lines = String::new();
        for entry in &live {
            lines.push_str(&serde_json::to_string(entry)?);
            lines.push('\n');
        }
        let tmp_path = self.dir.join("audit.jsonl.tmp");
        std::fs::write(&tmp_path, lines).map_err(|e| {
            SecurityError::Audit(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        std::fs::rename(&tmp_path, self.live_path()).map_err(|e| {
            SecurityError::Audit(format!("Failed to replace live audit file: {}", e))
        })?;

        tracing::info!(
            archived = old.len(),
            segment = %archive_path.display(),
            "Audit segment compacted"
        );
        Ok(old.len())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::chain_hash;
    use crate::event::SecurityEvent;
    use sha2::{Digest, Sha256};

    fn test_entry(seq: u64, prev: &str) -> AuditEntry {
        let event = SecurityEvent::new(EventType::DataAccess, Severity::Info).with_actor("u1");
        let content_hash = hex::encode(Sha256::digest(
            serde_json::to_string(&event).unwrap().as_bytes(),
        ));
        AuditEntry {
            event,
            content_hash: content_hash.clone(),
            previous_hash: prev.to_string(),
            sequence_number: seq,
            signature: None,
        }
    }

    fn test_chain(n: u64) -> Vec<AuditEntry> {
        let mut prev = "0".repeat(64);
        let mut entries = Vec::new();
        for seq in 0..n {
            let entry = test_entry(seq, &prev);
            prev = chain_hash(&entry.content_hash, &entry.previous_hash, seq);
            entries.push(entry);
        }
        entries
    }

    #[tokio::test]
    async fn test_memory_store_append_query() {
        let store = MemoryAuditStore::new();
        store.append_batch(&test_chain(5)).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 5);

        let result = store
            .query(&AuditQuery {
                actor_id: Some("u1".to_string()),
                limit: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.len(), 3);
        // Sequence descending
        assert_eq!(result[0].sequence_number, 4);
        assert_eq!(result[2].sequence_number, 2);
    }

    #[tokio::test]
    async fn test_memory_store_load_range() {
        let store = MemoryAuditStore::new();
        store.append_batch(&test_chain(10)).await.unwrap();

        let range = store.load_range(3, 6).await.unwrap();
        assert_eq!(range.len(), 4);
        assert_eq!(range[0].sequence_number, 3);
        assert_eq!(range[3].sequence_number, 6);
    }

    #[tokio::test]
    async fn test_memory_store_archive() {
        let store = MemoryAuditStore::new();
        store.append_batch(&test_chain(4)).await.unwrap();

        let moved = store
            .archive_before(chrono::Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(moved, 4);
        assert_eq!(store.len().await.unwrap(), 0);
        assert_eq!(store.archived_count().await, 4);
    }

    #[tokio::test]
    async fn test_file_store_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuditStore::new(dir.path()).unwrap();

        store.append_batch(&test_chain(3)).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 3);

        let last = store.last_entry().await.unwrap().unwrap();
        assert_eq!(last.sequence_number, 2);

        // Reopen the same directory — entries survive
        let reopened = FileAuditStore::new(dir.path()).unwrap();
        assert_eq!(reopened.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_file_store_archive_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuditStore::new(dir.path()).unwrap();
        store.append_batch(&test_chain(5)).await.unwrap();

        let moved = store
            .archive_before(chrono::Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(moved, 5);
        assert_eq!(store.len().await.unwrap(), 0);

        let has_segment = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().ends_with(".jsonl.gz"));
        assert!(has_segment);
    }

    #[tokio::test]
    async fn test_query_severity_floor() {
        let store = MemoryAuditStore::new();
        let mut entries = test_chain(2);
        entries[1].event.severity = Severity::Critical;
        store.append_batch(&entries).await.unwrap();

        let result = store
            .query(&AuditQuery {
                min_severity: Some(Severity::High),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].event.severity, Severity::Critical);
    }
}
