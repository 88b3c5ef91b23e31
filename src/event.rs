//! Core security event types
//!
//! All types use camelCase JSON serialization for wire compatibility.
//! A `SecurityEvent` is an immutable record of a security-relevant
//! occurrence; once constructed it is only ever read downstream.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Kind of security-relevant occurrence
///
/// Closed set — every decision point matches exhaustively so adding a
/// variant forces review of every consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AuthenticationSuccess,
    AuthenticationFailed,
    AuthenticationError,
    AuthorizationGranted,
    AuthorizationDenied,
    SessionCreated,
    SessionExpired,
    SessionRevoked,
    DataAccess,
    DataMasked,
    InjectionBlocked,
    RateLimitExceeded,
    AnomalyDetected,
    AlertRaised,
    IncidentOpened,
    ConfigChanged,
    AuditSelfTest,
    SystemError,
}

impl EventType {
    /// Compliance tags derived deterministically from the event type
    ///
    /// Tags group events for regulatory export (access logs, authentication
    /// records, data-protection records).
    pub fn compliance_tags(&self) -> BTreeSet<String> {
        let tags: &[&str] = match self {
            Self::AuthenticationSuccess | Self::AuthenticationFailed | Self::AuthenticationError => {
                &["authentication", "access_control"]
            }
            Self::AuthorizationGranted | Self::AuthorizationDenied => {
                &["authorization", "access_control"]
            }
            Self::SessionCreated | Self::SessionExpired | Self::SessionRevoked => {
                &["session_management", "access_control"]
            }
            Self::DataAccess => &["data_access"],
            Self::DataMasked | Self::InjectionBlocked => &["data_protection"],
            Self::RateLimitExceeded => &["abuse_prevention", "access_control"],
            Self::AnomalyDetected | Self::AlertRaised | Self::IncidentOpened => {
                &["threat_detection"]
            }
            Self::ConfigChanged => &["change_management"],
            Self::AuditSelfTest | Self::SystemError => &["system_health"],
        };
        tags.iter().map(|t| t.to_string()).collect()
    }

    /// Numeric code used as an anomaly feature
    pub fn code(&self) -> u8 {
        match self {
            Self::AuthenticationSuccess => 0,
            Self::AuthenticationFailed => 1,
            Self::AuthenticationError => 2,
            Self::AuthorizationGranted => 3,
            Self::AuthorizationDenied => 4,
            Self::SessionCreated => 5,
            Self::SessionExpired => 6,
            Self::SessionRevoked => 7,
            Self::DataAccess => 8,
            Self::DataMasked => 9,
            Self::InjectionBlocked => 10,
            Self::RateLimitExceeded => 11,
            Self::AnomalyDetected => 12,
            Self::AlertRaised => 13,
            Self::IncidentOpened => 14,
            Self::ConfigChanged => 15,
            Self::AuditSelfTest => 16,
            Self::SystemError => 17,
        }
    }
}

/// Event severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A single security-relevant occurrence
///
/// Immutable value type. Built by the security manager and fanned out to
/// the audit trail and the behavior/anomaly subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// What happened
    pub event_type: EventType,

    /// How severe it is
    pub severity: Severity,

    /// When it happened (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Actor this event concerns, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    /// Session the event occurred in, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Network source the request came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,

    /// Resource the event touched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Operation attempted or performed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Free-form structured detail
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,

    /// Regulatory grouping tags, derived from the event type
    #[serde(default)]
    pub compliance_tags: BTreeSet<String>,
}

impl SecurityEvent {
    /// Create a new event with auto-generated id, timestamp, and tags
    pub fn new(event_type: EventType, severity: Severity) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            event_type,
            severity,
            timestamp: chrono::Utc::now(),
            actor_id: None,
            session_id: None,
            source_address: None,
            resource: None,
            action: None,
            details: HashMap::new(),
            compliance_tags: event_type.compliance_tags(),
        }
    }

    /// Set the actor
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Set the session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the source address
    pub fn with_source(mut self, source_address: impl Into<String>) -> Self {
        self.source_address = Some(source_address.into());
        self
    }

    /// Set the resource
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Set the action
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Add a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Info > Severity::Debug);
    }

    #[test]
    fn test_event_creation() {
        let event = SecurityEvent::new(EventType::AuthenticationFailed, Severity::Warning)
            .with_actor("u1")
            .with_source("1.2.3.4");

        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.event_type, EventType::AuthenticationFailed);
        assert_eq!(event.actor_id.as_deref(), Some("u1"));
        assert!(event.compliance_tags.contains("authentication"));
        assert!(event.compliance_tags.contains("access_control"));
    }

    #[test]
    fn test_compliance_tags_deterministic() {
        let a = EventType::DataMasked.compliance_tags();
        let b = EventType::DataMasked.compliance_tags();
        assert_eq!(a, b);
        assert!(a.contains("data_protection"));
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = SecurityEvent::new(EventType::AuthorizationDenied, Severity::Medium)
            .with_actor("u1")
            .with_resource("reports/q3")
            .with_detail("reason", serde_json::json!("insufficient_clearance"));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"eventType\":\"authorization_denied\""));
        assert!(json.contains("\"severity\":\"medium\""));

        let parsed: SecurityEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.event_type, event.event_type);
        assert_eq!(parsed.details["reason"], "insufficient_clearance");
    }

    #[test]
    fn test_event_type_codes_unique() {
        let all = [
            EventType::AuthenticationSuccess,
            EventType::AuthenticationFailed,
            EventType::AuthenticationError,
            EventType::AuthorizationGranted,
            EventType::AuthorizationDenied,
            EventType::SessionCreated,
            EventType::SessionExpired,
            EventType::SessionRevoked,
            EventType::DataAccess,
            EventType::DataMasked,
            EventType::InjectionBlocked,
            EventType::RateLimitExceeded,
            EventType::AnomalyDetected,
            EventType::AlertRaised,
            EventType::IncidentOpened,
            EventType::ConfigChanged,
            EventType::AuditSelfTest,
            EventType::SystemError,
        ];
        let codes: std::collections::HashSet<u8> = all.iter().map(|t| t.code()).collect();
        assert_eq!(codes.len(), all.len());
    }
}
