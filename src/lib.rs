//! # aegis-core
//!
//! Security event pipeline: authentication and authorization, a
//! tamper-evident audit trail, behavioral anomaly detection, and alert
//! escalation.
//!
//! ## Overview
//!
//! `aegis-core` routes every security-relevant outcome through a single
//! pipeline. The [`SecurityManager`] authenticates credentials into a
//! [`SecurityContext`], makes authorization decisions, and emits each
//! outcome as a [`SecurityEvent`]. Events land in a hash-chained
//! [`AuditTrail`] and feed per-actor behavior profiles; rule and model
//! detections become alerts, and severe alerts escalate to incidents.
//!
//! Collaborators (credential verification, RBAC, sensitive-data scanning,
//! audit persistence) sit behind traits so deployments can plug in their
//! own backends.
//!
//! ## Quick Start
//!
//! ```rust
//! use aegis_core::{
//!     ClearanceLevel, MemoryAuditStore, MemoryRbacResolver, SecurityConfig,
//!     SecurityManager, StaticCredentialVerifier, VerifiedIdentity,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> aegis_core::Result<()> {
//! let verifier = StaticCredentialVerifier::new().with_identity(
//!     "alice:correct-horse",
//!     VerifiedIdentity {
//!         actor_id: "alice".to_string(),
//!         capabilities: Default::default(),
//!         clearance_level: ClearanceLevel::Internal,
//!     },
//! );
//! let rbac = MemoryRbacResolver::new().grant("alice", "read");
//!
//! let manager = SecurityManager::new(
//!     SecurityConfig::default(),
//!     Arc::new(MemoryAuditStore::new()),
//!     Arc::new(verifier),
//!     Arc::new(rbac),
//! )
//! .await?;
//!
//! let ctx = manager
//!     .authenticate("alice:correct-horse", "10.0.0.1", "firefox")
//!     .await?;
//! let decision = manager.authorize(&ctx, "read", None, None).await?;
//! assert!(decision.allowed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **SecurityManager** — orchestrator and single hot-path entry point
//! - **AuditTrail** — append-only, hash-chained log with batched flush
//! - **BehaviorStore / AnomalyDetector** — rolling profiles and a
//!   swappable outlier model
//! - **AlertManager** — deduplication, lifecycle, incident escalation

pub mod alert;
pub mod anomaly;
pub mod audit;
pub mod behavior;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod manager;
pub mod sanitize;

// Re-export core types
pub use alert::{
    AlertManager, AlertStatus, AlertType, IncidentStatus, RaiseOutcome, SecurityAlert,
    SecurityIncident,
};
pub use anomaly::{AnomalyDetector, AnomalyModel, Detection, GaussianTrainer, ModelTrainer};
pub use audit::{
    AppendAck, AuditEntry, AuditQuery, AuditStore, AuditTrail, ComplianceReport, FileAuditStore,
    IntegrityReport, IntegrityViolation, MemoryAuditStore, ViolationKind, GENESIS_HASH,
};
pub use behavior::{BehaviorProfile, BehaviorStore, FeatureVector};
pub use config::SecurityConfig;
pub use context::{ClearanceLevel, SecurityContext, Session};
pub use error::{Result, SecurityError};
pub use event::{EventType, SecurityEvent, Severity};
pub use manager::{
    CredentialVerifier, Decision, MemoryRbacResolver, RbacResolver, SecurityManager,
    StaticCredentialVerifier, VerifiedIdentity,
};
pub use sanitize::{Finding, InjectionFilter, RegexScanner, SensitiveCategory, SensitiveDataScanner};
