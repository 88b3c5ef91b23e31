//! Append-only tamper-evident audit trail
//!
//! Every entry wraps one `SecurityEvent` with a SHA-256 content hash and a
//! link to the previous entry's chain hash, so any retroactive edit is
//! detectable by recomputing the chain. Appends buffer in memory and never
//! touch storage; a flush moves the buffer to the `AuditStore` in one batch.

use crate::config::SecurityConfig;
use crate::error::{Result, SecurityError};
use crate::event::SecurityEvent;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod store;

pub use store::{AuditQuery, AuditStore, FileAuditStore, MemoryAuditStore};

/// Hash value used to chain the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One audited event with its chain linkage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// The wrapped event
    pub event: SecurityEvent,

    /// SHA-256 hex digest of the serialized event
    pub content_hash: String,

    /// Chain hash of the previous entry (genesis hash for entry 0)
    pub previous_hash: String,

    /// Strictly increasing, gapless per store instance
    pub sequence_number: u64,

    /// Keyed digest over the chain hash, when signing is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl AuditEntry {
    /// The chain hash this entry contributes to its successor
    pub fn chain_hash(&self) -> String {
        chain_hash(&self.content_hash, &self.previous_hash, self.sequence_number)
    }
}

/// SHA-256 hex digest of an event's canonical JSON
pub fn content_hash(event: &SecurityEvent) -> Result<String> {
    let serialized = serde_json::to_string(event)?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

/// chain_hash(n) = SHA-256(content_hash(n) ∥ previous_hash(n) ∥ n)
pub fn chain_hash(content_hash: &str, previous_hash: &str, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Kind of integrity violation found during verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Stored content hash does not match the recomputed event hash
    HashMismatch,
    /// Entry's previous_hash does not equal the predecessor's chain hash
    ChainBreak,
    /// Sequence numbers are not contiguous
    SequenceGap,
}

/// A single integrity finding — operator-visible data, never an exception
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityViolation {
    /// Sequence number where the violation was detected
    pub sequence_number: u64,
    pub kind: ViolationKind,
    pub detail: String,
}

/// Result of a chain verification pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// True when no violations were found
    pub verified: bool,
    /// Entries examined
    pub total_entries: usize,
    pub violations: Vec<IntegrityViolation>,
}

/// Read-side compliance projection grouped by tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    /// Regulation identifier the export was requested for
    pub regulation: String,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Subject (actor) filter, when the export concerns one data subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub total_events: usize,
    /// Event ids grouped by compliance tag
    pub events_by_tag: BTreeMap<String, Vec<String>>,
}

/// Buffer state guarded by a single lock so sequence assignment and chain
/// linkage can never interleave.
struct ChainBuffer {
    entries: Vec<AuditEntry>,
    next_sequence: u64,
    last_chain_hash: String,
}

/// Append-only audit trail with cryptographic chaining
///
/// `append` is synchronous in-memory work under the buffer lock; `flush`
/// swaps the buffer out under the lock and performs storage I/O outside it.
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    buffer: Mutex<ChainBuffer>,
    /// Serializes whole flush bodies so concurrent flushes cannot commit
    /// batches out of sequence order
    flush_lock: Mutex<()>,
    signing_key: Option<String>,
    flush_threshold: usize,
}

impl AuditTrail {
    /// Create a trail over a store, resuming the chain from the store's
    /// last entry if it has one
    pub async fn new(store: Arc<dyn AuditStore>, config: &SecurityConfig) -> Result<Self> {
        let (next_sequence, last_chain_hash) = match store.last_entry().await? {
            Some(last) => (last.sequence_number + 1, last.chain_hash()),
            None => (0, GENESIS_HASH.to_string()),
        };

        let signing_key = if config.signing_enabled {
            match &config.signing_key {
                Some(key) => Some(key.clone()),
                None => {
                    return Err(SecurityError::Config(
                        "signing enabled but no signing key configured".to_string(),
                    ))
                }
            }
        } else {
            None
        };

        Ok(Self {
            store,
            buffer: Mutex::new(ChainBuffer {
                entries: Vec::new(),
                next_sequence,
                last_chain_hash,
            }),
            flush_lock: Mutex::new(()),
            signing_key,
            flush_threshold: config.flush_buffer_threshold,
        })
    }

    /// Append an event to the trail
    ///
    /// Auto-fills id and timestamp when absent. Buffers in memory and
    /// never blocks on storage I/O. Returns the assigned sequence number
    /// and whether the buffer has reached the opportunistic flush size.
    pub async fn append(&self, mut event: SecurityEvent) -> Result<AppendAck> {
        if event.id.is_empty() {
            event.id = format!("evt-{}", uuid::Uuid::new_v4());
        }
        if event.compliance_tags.is_empty() {
            event.compliance_tags = event.event_type.compliance_tags();
        }

        let content_hash = content_hash(&event)?;

        let mut buffer = self.buffer.lock().await;
        let sequence = buffer.next_sequence;
        let previous_hash = buffer.last_chain_hash.clone();
        let chain = chain_hash(&content_hash, &previous_hash, sequence);

        let signature = self.signing_key.as_ref().map(|key| {
            let mut hasher = Sha256::new();
            hasher.update(key.as_bytes());
            hasher.update(chain.as_bytes());
            hex::encode(hasher.finalize())
        });

        buffer.entries.push(AuditEntry {
            event,
            content_hash,
            previous_hash,
            sequence_number: sequence,
            signature,
        });
        buffer.next_sequence = sequence + 1;
        buffer.last_chain_hash = chain;

        let should_flush = buffer.entries.len() >= self.flush_threshold;
        Ok(AppendAck {
            sequence_number: sequence,
            should_flush,
        })
    }

    /// Move buffered entries to the store in one batch
    ///
    /// Idempotent and safe concurrent with `append` — the buffer is locked
    /// only for the swap. Flush bodies themselves are serialized under
    /// `flush_lock` so two in-flight flushes cannot commit batches out of
    /// sequence order. On store failure the batch is re-buffered at the
    /// front so a later flush retries in order.
    pub async fn flush(&self) -> Result<usize> {
        let _flushing = self.flush_lock.lock().await;

        let batch = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut buffer.entries)
        };

        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        if let Err(e) = self.store.append_batch(&batch).await {
            let mut buffer = self.buffer.lock().await;
            let mut restored = batch;
            restored.extend(buffer.entries.drain(..));
            buffer.entries = restored;
            return Err(e);
        }

        tracing::debug!(count, store = self.store.name(), "Audit buffer flushed");
        Ok(count)
    }

    /// Entries currently buffered and not yet persisted
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.entries.len()
    }

    /// Recompute the chain over `[from, to]` and report every violation
    ///
    /// Covers both persisted and still-buffered entries. Never errors on
    /// findings — a violation is data, not an exception.
    pub async fn verify_integrity(&self, range: Option<(u64, u64)>) -> Result<IntegrityReport> {
        let (from, to) = range.unwrap_or((0, u64::MAX));

        let mut entries = self.store.load_range(from, to).await?;
        {
            let buffer = self.buffer.lock().await;
            entries.extend(
                buffer
                    .entries
                    .iter()
                    .filter(|e| e.sequence_number >= from && e.sequence_number <= to)
                    .cloned(),
            );
        }
        entries.sort_by_key(|e| e.sequence_number);

        let mut violations = Vec::new();
        let mut prev_chain: Option<(u64, String)> = None;

        for entry in &entries {
            let recomputed = content_hash(&entry.event)?;
            if recomputed != entry.content_hash {
                violations.push(IntegrityViolation {
                    sequence_number: entry.sequence_number,
                    kind: ViolationKind::HashMismatch,
                    detail: format!(
                        "content hash mismatch at sequence {}",
                        entry.sequence_number
                    ),
                });
            }

            if let Some((prev_seq, prev_hash)) = &prev_chain {
                if entry.sequence_number != prev_seq + 1 {
                    violations.push(IntegrityViolation {
                        sequence_number: entry.sequence_number,
                        kind: ViolationKind::SequenceGap,
                        detail: format!(
                            "sequence jumped from {} to {}",
                            prev_seq, entry.sequence_number
                        ),
                    });
                } else if &entry.previous_hash != prev_hash {
                    violations.push(IntegrityViolation {
                        sequence_number: entry.sequence_number,
                        kind: ViolationKind::ChainBreak,
                        detail: format!(
                            "previous hash does not match chain at sequence {}",
                            entry.sequence_number
                        ),
                    });
                }
            } else if entry.sequence_number == 0 && entry.previous_hash != GENESIS_HASH {
                violations.push(IntegrityViolation {
                    sequence_number: 0,
                    kind: ViolationKind::ChainBreak,
                    detail: "entry 0 is not anchored to the genesis hash".to_string(),
                });
            }

            prev_chain = Some((entry.sequence_number, entry.chain_hash()));
        }

        Ok(IntegrityReport {
            verified: violations.is_empty(),
            total_entries: entries.len(),
            violations,
        })
    }

    /// Filtered query over persisted and buffered entries,
    /// sequence-descending (most recent first)
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let mut result = self.store.query(query).await?;
        {
            let buffer = self.buffer.lock().await;
            let mut buffered: Vec<AuditEntry> = buffer
                .entries
                .iter()
                .rev()
                .filter(|e| query.matches(e))
                .cloned()
                .collect();
            buffered.extend(result);
            result = buffered;
        }
        result.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        if query.limit > 0 {
            result.truncate(query.limit);
        }
        Ok(result)
    }

    /// Read-side compliance projection — has no effect on the chain
    pub async fn export_compliance_report(
        &self,
        regulation: &str,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
        subject: Option<&str>,
    ) -> Result<ComplianceReport> {
        let entries = self
            .query(&AuditQuery {
                actor_id: subject.map(|s| s.to_string()),
                from_time: Some(from),
                to_time: Some(to),
                limit: 0,
                ..Default::default()
            })
            .await?;

        let mut events_by_tag: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &entries {
            for tag in &entry.event.compliance_tags {
                events_by_tag
                    .entry(tag.clone())
                    .or_default()
                    .push(entry.event.id.clone());
            }
        }

        Ok(ComplianceReport {
            regulation: regulation.to_string(),
            generated_at: chrono::Utc::now(),
            subject: subject.map(|s| s.to_string()),
            total_events: entries.len(),
            events_by_tag,
        })
    }

    /// Compress/archive persisted entries older than `cutoff`
    ///
    /// Delegates to the store; already-computed hashes are never touched.
    pub async fn compact(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        self.store.archive_before(cutoff).await
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }
}

/// Acknowledgement returned by `append`
#[derive(Debug, Clone, Copy)]
pub struct AppendAck {
    /// Sequence number assigned to the entry
    pub sequence_number: u64,
    /// Buffer reached the opportunistic flush size
    pub should_flush: bool,
}
