//! Request-scoped trust context and server-side sessions

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Ordered classification level gating resource access
///
/// Independent of capability checks: a context may hold the right
/// capability and still be denied on clearance grounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceLevel {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
    TopSecret,
}

impl ClearanceLevel {
    fn rank(&self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Internal => 1,
            Self::Confidential => 2,
            Self::Restricted => 3,
            Self::TopSecret => 4,
        }
    }
}

impl PartialOrd for ClearanceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClearanceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for ClearanceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Internal => write!(f, "internal"),
            Self::Confidential => write!(f, "confidential"),
            Self::Restricted => write!(f, "restricted"),
            Self::TopSecret => write!(f, "top_secret"),
        }
    }
}

/// Per-request trust context
///
/// Created by the security manager on successful authentication, read-only
/// downstream, discarded at request end. Never persisted.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    /// Authenticated actor
    pub actor_id: String,

    /// Session backing this context
    pub session_id: String,

    /// Where the request came from
    pub source_address: String,

    /// Named rights resolved by the RBAC collaborator
    pub capabilities: BTreeSet<String>,

    /// Classification ceiling for resource access
    pub clearance_level: ClearanceLevel,

    /// Computed risk in [0, 1]
    pub risk_score: f64,

    /// Whether authentication succeeded
    pub authenticated: bool,
}

impl SecurityContext {
    /// Whether the context holds a named capability
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Server-side session record
///
/// Owned by the security manager; invalidated on logout, timeout, or
/// revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier (ses-<uuid>)
    pub session_id: String,

    /// Actor the session belongs to
    pub actor_id: String,

    /// Creation time (UTC)
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Expiry time (UTC)
    pub expires_at: chrono::DateTime<chrono::Utc>,

    /// Source address the session was established from
    pub source_address: String,

    /// False once logged out or revoked
    pub valid: bool,
}

impl Session {
    /// Create a new session valid for `ttl_secs` seconds
    pub fn new(
        actor_id: impl Into<String>,
        source_address: impl Into<String>,
        ttl_secs: u64,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id: format!("ses-{}", uuid::Uuid::new_v4()),
            actor_id: actor_id.into(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs as i64),
            source_address: source_address.into(),
            valid: true,
        }
    }

    /// Whether the session is valid and unexpired at `now`
    pub fn is_active(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.valid && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clearance_ordering() {
        assert!(ClearanceLevel::TopSecret > ClearanceLevel::Restricted);
        assert!(ClearanceLevel::Restricted > ClearanceLevel::Confidential);
        assert!(ClearanceLevel::Confidential > ClearanceLevel::Internal);
        assert!(ClearanceLevel::Internal > ClearanceLevel::Public);
    }

    #[test]
    fn test_session_lifecycle() {
        let session = Session::new("u1", "10.0.0.1", 3600);
        assert!(session.session_id.starts_with("ses-"));
        assert!(session.is_active(chrono::Utc::now()));

        let later = chrono::Utc::now() + chrono::Duration::seconds(3601);
        assert!(!session.is_active(later));
    }

    #[test]
    fn test_invalidated_session_inactive() {
        let mut session = Session::new("u1", "10.0.0.1", 3600);
        session.valid = false;
        assert!(!session.is_active(chrono::Utc::now()));
    }

    #[test]
    fn test_context_capability_check() {
        let ctx = SecurityContext {
            actor_id: "u1".to_string(),
            session_id: "ses-x".to_string(),
            source_address: "10.0.0.1".to_string(),
            capabilities: ["read".to_string(), "write".to_string()].into_iter().collect(),
            clearance_level: ClearanceLevel::Internal,
            risk_score: 0.0,
            authenticated: true,
        };

        assert!(ctx.has_capability("read"));
        assert!(!ctx.has_capability("admin"));
    }
}
