//! Security manager — authentication, authorization, and event fan-out
//!
//! The manager is the single entry point on the hot path: it builds a
//! `SecurityContext` from credentials, makes authorization decisions, and
//! routes every outcome as a `SecurityEvent` to the audit trail and the
//! behavior/anomaly subsystem. Credential verification, RBAC resolution,
//! and sensitive-data scanning are collaborator traits so deployments can
//! plug in their own backends.

use crate::alert::{AlertManager, AlertType, RaiseOutcome};
use crate::anomaly::{AnomalyDetector, Detection};
use crate::audit::{AuditStore, AuditTrail, IntegrityReport};
use crate::behavior::BehaviorStore;
use crate::config::SecurityConfig;
use crate::context::{ClearanceLevel, SecurityContext, Session};
use crate::error::{codes, Result, SecurityError};
use crate::event::{EventType, SecurityEvent, Severity};
use crate::sanitize::{InjectionFilter, RegexScanner, SensitiveDataScanner};
use async_trait::async_trait;
use chrono::Timelike;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Identity resolved by the credential collaborator
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub actor_id: String,
    pub capabilities: BTreeSet<String>,
    pub clearance_level: ClearanceLevel,
}

/// Collaborator boundary for credential verification
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a raw credential, returning the identity it proves
    async fn verify(&self, raw_credential: &str) -> Option<VerifiedIdentity>;
}

/// Collaborator boundary for role-based access control
#[async_trait]
pub trait RbacResolver: Send + Sync {
    async fn get_permissions(&self, actor_id: &str) -> BTreeSet<String>;

    async fn get_clearance(&self, actor_id: &str) -> ClearanceLevel;

    /// Whether the actor may perform `operation` on `resource`
    async fn check(
        &self,
        actor_id: &str,
        operation: &str,
        resource: Option<&str>,
        context: &SecurityContext,
    ) -> bool;
}

/// In-memory credential verifier keyed by raw credential string
///
/// Credentials take the `actor:secret` form so failed attempts can still
/// be attributed to an actor for alerting.
#[derive(Default)]
pub struct StaticCredentialVerifier {
    identities: HashMap<String, VerifiedIdentity>,
}

impl StaticCredentialVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential and the identity it proves
    pub fn with_identity(mut self, raw_credential: &str, identity: VerifiedIdentity) -> Self {
        self.identities.insert(raw_credential.to_string(), identity);
        self
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(&self, raw_credential: &str) -> Option<VerifiedIdentity> {
        self.identities.get(raw_credential).cloned()
    }
}

/// In-memory RBAC resolver
#[derive(Default)]
pub struct MemoryRbacResolver {
    permissions: HashMap<String, BTreeSet<String>>,
    clearances: HashMap<String, ClearanceLevel>,
}

impl MemoryRbacResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant an actor a named permission
    pub fn grant(mut self, actor_id: &str, permission: &str) -> Self {
        self.permissions
            .entry(actor_id.to_string())
            .or_default()
            .insert(permission.to_string());
        self
    }

    /// Set an actor's clearance
    pub fn with_clearance(mut self, actor_id: &str, level: ClearanceLevel) -> Self {
        self.clearances.insert(actor_id.to_string(), level);
        self
    }
}

#[async_trait]
impl RbacResolver for MemoryRbacResolver {
    async fn get_permissions(&self, actor_id: &str) -> BTreeSet<String> {
        self.permissions.get(actor_id).cloned().unwrap_or_default()
    }

    async fn get_clearance(&self, actor_id: &str) -> ClearanceLevel {
        self.clearances
            .get(actor_id)
            .copied()
            .unwrap_or(ClearanceLevel::Public)
    }

    async fn check(
        &self,
        actor_id: &str,
        operation: &str,
        _resource: Option<&str>,
        _context: &SecurityContext,
    ) -> bool {
        self.permissions
            .get(actor_id)
            .map(|perms| perms.contains(operation))
            .unwrap_or(false)
    }
}

/// Sliding one-minute window rate limiter, pruned lazily per check
struct RateLimiter {
    max_per_minute: u32,
    hits: HashMap<String, Vec<chrono::DateTime<chrono::Utc>>>,
}

impl RateLimiter {
    fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            hits: HashMap::new(),
        }
    }

    /// Record one attempt for `source`; false when the window is full
    fn check(&mut self, source: &str, now: chrono::DateTime<chrono::Utc>) -> bool {
        let cutoff = now - chrono::Duration::seconds(60);
        let hits = self.hits.entry(source.to_string()).or_default();
        hits.retain(|t| *t > cutoff);
        if hits.len() as u32 >= self.max_per_minute {
            return false;
        }
        hits.push(now);
        true
    }

    /// Drop sources whose whole window has aged out, so idle sources do
    /// not pin map keys forever
    fn prune(&mut self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(60);
        let before = self.hits.len();
        self.hits.retain(|_, hits| {
            hits.retain(|t| *t > cutoff);
            !hits.is_empty()
        });
        before - self.hits.len()
    }
}

/// Drop invalid/expired sessions and idle rate-limit windows
///
/// Shared by the hourly maintenance loop and the on-demand
/// `SecurityManager::prune_stale_state`.
async fn prune_state(
    sessions: &RwLock<HashMap<String, Session>>,
    rate_limiter: &Mutex<RateLimiter>,
    now: chrono::DateTime<chrono::Utc>,
) -> usize {
    let removed_sessions = {
        let mut sessions = sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_active(now));
        before - sessions.len()
    };
    let removed_sources = rate_limiter.lock().await.prune(now);
    removed_sessions + removed_sources
}

/// Outcome of an authorization check
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "allowed".to_string(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Orchestrator for the security pipeline
pub struct SecurityManager {
    config: SecurityConfig,
    verifier: Arc<dyn CredentialVerifier>,
    rbac: Arc<dyn RbacResolver>,
    scanner: Arc<dyn SensitiveDataScanner>,
    audit: Arc<AuditTrail>,
    detector: Arc<AnomalyDetector>,
    alerts: Arc<AlertManager>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    injection_filter: InjectionFilter,
    suspicious_ranges: Vec<String>,
    suspicious_agents: Vec<String>,
    sensitive_operations: BTreeSet<String>,
    resource_clearance: HashMap<String, ClearanceLevel>,
    running: Arc<RwLock<bool>>,
}

impl SecurityManager {
    pub async fn new(
        config: SecurityConfig,
        store: Arc<dyn AuditStore>,
        verifier: Arc<dyn CredentialVerifier>,
        rbac: Arc<dyn RbacResolver>,
    ) -> Result<Self> {
        let audit = Arc::new(AuditTrail::new(store, &config).await?);
        let profiles = Arc::new(BehaviorStore::new(config.clone()));
        let detector = Arc::new(AnomalyDetector::new(profiles, config.clone()));
        let alerts = Arc::new(AlertManager::new(detector.clone()));

        Ok(Self {
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                config.rate_limit_max_per_minute,
            ))),
            verifier,
            rbac,
            scanner: Arc::new(RegexScanner::new()?),
            audit,
            detector,
            alerts,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            injection_filter: InjectionFilter::new()?,
            suspicious_ranges: vec!["203.0.113.".to_string(), "198.51.100.".to_string()],
            suspicious_agents: vec![
                "sqlmap".to_string(),
                "nikto".to_string(),
                "curl".to_string(),
                "python-requests".to_string(),
            ],
            sensitive_operations: ["delete", "export", "admin", "configure"]
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
            resource_clearance: HashMap::new(),
            running: Arc::new(RwLock::new(false)),
            config,
        })
    }

    /// Replace the default regex scanner
    pub fn with_scanner(mut self, scanner: Arc<dyn SensitiveDataScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Source-address prefixes that add risk on authentication
    pub fn with_suspicious_ranges(mut self, ranges: Vec<String>) -> Self {
        self.suspicious_ranges = ranges;
        self
    }

    /// User-agent substrings that add risk on authentication
    pub fn with_suspicious_agents(mut self, agents: Vec<String>) -> Self {
        self.suspicious_agents = agents;
        self
    }

    /// Operations denied for high-risk contexts
    pub fn with_sensitive_operations(mut self, operations: BTreeSet<String>) -> Self {
        self.sensitive_operations = operations;
        self
    }

    /// Require a clearance level to touch a resource
    pub fn with_resource_clearance(mut self, resource: &str, level: ClearanceLevel) -> Self {
        self.resource_clearance.insert(resource.to_string(), level);
        self
    }

    /// Authenticate a raw credential from a source
    ///
    /// Failures emit an event before returning: malformed credentials as
    /// an authentication error, verifier rejections as a failure (which
    /// feeds the failed-login rule), and window overruns as a rate-limit
    /// event.
    pub async fn authenticate(
        &self,
        credential: &str,
        source_address: &str,
        user_agent: &str,
    ) -> Result<SecurityContext> {
        let now = chrono::Utc::now();
        let actor_hint = credential.split(':').next().map(|s| s.to_string());

        if credential.len() < 8 {
            let mut event = SecurityEvent::new(EventType::AuthenticationError, Severity::Warning)
                .with_source(source_address)
                .with_detail("reason", serde_json::json!("credential_too_short"));
            if let Some(hint) = &actor_hint {
                event = event.with_actor(hint.clone());
            }
            self.record_event(event).await?;
            return Err(SecurityError::authentication(
                codes::BAD_CREDENTIAL,
                "credential is malformed or too short",
            ));
        }

        let within_limit = {
            let mut limiter = self.rate_limiter.lock().await;
            limiter.check(source_address, now)
        };
        if !within_limit {
            let event = SecurityEvent::new(EventType::RateLimitExceeded, Severity::Warning)
                .with_source(source_address)
                .with_detail(
                    "maxPerMinute",
                    serde_json::json!(self.config.rate_limit_max_per_minute),
                );
            self.record_event(event).await?;
            return Err(SecurityError::authentication(
                codes::RATE_LIMITED,
                "too many authentication attempts from this source",
            ));
        }

        let identity = match self.verifier.verify(credential).await {
            Some(identity) => identity,
            None => {
                let mut event =
                    SecurityEvent::new(EventType::AuthenticationFailed, Severity::Warning)
                        .with_source(source_address)
                        .with_detail("userAgent", serde_json::json!(user_agent));
                if let Some(hint) = &actor_hint {
                    event = event.with_actor(hint.clone());
                }
                self.record_event(event).await?;
                return Err(SecurityError::authentication(
                    codes::VERIFY_FAILED,
                    "credential verification failed",
                ));
            }
        };

        let risk_score = self
            .score_risk(&identity.actor_id, source_address, user_agent, now)
            .await;

        let mut capabilities = self.rbac.get_permissions(&identity.actor_id).await;
        capabilities.extend(identity.capabilities.iter().cloned());
        let clearance_level = self
            .rbac
            .get_clearance(&identity.actor_id)
            .await
            .max(identity.clearance_level);

        let session = Session::new(
            identity.actor_id.clone(),
            source_address,
            self.config.session_ttl_secs,
        );
        let session_id = session.session_id.clone();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);

        self.record_event(
            SecurityEvent::new(EventType::SessionCreated, Severity::Info)
                .with_actor(identity.actor_id.clone())
                .with_session(session_id.clone())
                .with_source(source_address),
        )
        .await?;
        self.record_event(
            SecurityEvent::new(EventType::AuthenticationSuccess, Severity::Info)
                .with_actor(identity.actor_id.clone())
                .with_session(session_id.clone())
                .with_source(source_address)
                .with_detail("riskScore", serde_json::json!(risk_score))
                .with_detail("userAgent", serde_json::json!(user_agent)),
        )
        .await?;

        Ok(SecurityContext {
            actor_id: identity.actor_id,
            session_id,
            source_address: source_address.to_string(),
            capabilities,
            clearance_level,
            risk_score,
            authenticated: true,
        })
    }

    /// Fixed-weight risk score: suspicious source range +0.3, suspicious
    /// user agent +0.2, unusual hour for the actor +0.1, clamped after
    /// summing.
    async fn score_risk(
        &self,
        actor_id: &str,
        source_address: &str,
        user_agent: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> f64 {
        let mut score: f64 = 0.0;

        if self
            .suspicious_ranges
            .iter()
            .any(|prefix| source_address.starts_with(prefix.as_str()))
        {
            score += 0.3;
        }

        let agent = user_agent.to_lowercase();
        if self
            .suspicious_agents
            .iter()
            .any(|s| agent.contains(s.as_str()))
        {
            score += 0.2;
        }

        if let Some(profile) = self.detector.profiles().profile(actor_id).await {
            if profile.is_rare_hour(now.hour()) {
                score += 0.1;
            }
        }

        score.clamp(0.0, 1.0)
    }

    /// Rebuild a context from an existing session
    pub async fn resume_session(&self, session_id: &str) -> Result<SecurityContext> {
        let now = chrono::Utc::now();
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(session_id).cloned()
        };
        let session = session.ok_or_else(|| {
            SecurityError::authentication(codes::INVALID_SESSION, "unknown session")
        })?;

        if !session.is_active(now) {
            if session.valid {
                self.record_event(
                    SecurityEvent::new(EventType::SessionExpired, Severity::Info)
                        .with_actor(session.actor_id.clone())
                        .with_session(session_id),
                )
                .await?;
            }
            return Err(SecurityError::authentication(
                codes::INVALID_SESSION,
                "session is expired or revoked",
            ));
        }

        let capabilities = self.rbac.get_permissions(&session.actor_id).await;
        let clearance_level = self.rbac.get_clearance(&session.actor_id).await;

        Ok(SecurityContext {
            actor_id: session.actor_id,
            session_id: session.session_id,
            source_address: session.source_address,
            capabilities,
            clearance_level,
            risk_score: 0.0,
            authenticated: true,
        })
    }

    /// Authorize an operation for a context
    ///
    /// Pure decision over the context, RBAC, clearance, risk, and payload
    /// contents. Every branch emits a matching event; the resource itself
    /// is never touched.
    pub async fn authorize(
        &self,
        context: &SecurityContext,
        operation: &str,
        resource: Option<&str>,
        payload: Option<&serde_json::Value>,
    ) -> Result<Decision> {
        let decision = self
            .authorize_decision(context, operation, resource, payload)
            .await;

        let (event_type, severity) = if decision.allowed {
            (EventType::AuthorizationGranted, Severity::Info)
        } else {
            (EventType::AuthorizationDenied, Severity::Medium)
        };
        let mut event = SecurityEvent::new(event_type, severity)
            .with_actor(context.actor_id.clone())
            .with_session(context.session_id.clone())
            .with_source(context.source_address.clone())
            .with_action(operation)
            .with_detail("reason", serde_json::json!(decision.reason));
        if let Some(resource) = resource {
            event = event.with_resource(resource);
        }
        self.record_event(event).await?;

        Ok(decision)
    }

    async fn authorize_decision(
        &self,
        context: &SecurityContext,
        operation: &str,
        resource: Option<&str>,
        payload: Option<&serde_json::Value>,
    ) -> Decision {
        if !context.authenticated {
            return Decision::deny("context is not authenticated");
        }

        if !self
            .rbac
            .check(&context.actor_id, operation, resource, context)
            .await
        {
            return Decision::deny(format!("operation {} not permitted", operation));
        }

        if let Some(resource) = resource {
            let required = self
                .resource_clearance
                .get(resource)
                .copied()
                .unwrap_or(ClearanceLevel::Public);
            if required > context.clearance_level {
                return Decision::deny(format!(
                    "resource requires {} clearance, context has {}",
                    required, context.clearance_level
                ));
            }
        }

        if context.risk_score > self.config.risk_threshold
            && self.sensitive_operations.contains(operation)
        {
            return Decision::deny(format!(
                "risk score {:.2} too high for sensitive operation",
                context.risk_score
            ));
        }

        if let Some(payload) = payload {
            // Scan failures do not block the decision; the findings check
            // simply has nothing to act on.
            match self.scanner.scan(payload) {
                Ok(findings) => {
                    if findings
                        .iter()
                        .any(|f| f.category.required_clearance() > context.clearance_level)
                    {
                        return Decision::deny(
                            "payload contains categories above the context clearance",
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sensitive-data scan failed during authorization");
                }
            }
        }

        Decision::allow()
    }

    /// Strip known injection patterns from an inbound payload
    ///
    /// Emits an event and raises an alert when anything was removed.
    pub async fn sanitize_inbound(
        &self,
        payload: &serde_json::Value,
        context: &SecurityContext,
    ) -> Result<serde_json::Value> {
        let mut cleaned = payload.clone();
        let stripped = self.injection_filter.sanitize_value(&mut cleaned);

        if stripped > 0 {
            self.record_event(
                SecurityEvent::new(EventType::InjectionBlocked, Severity::Warning)
                    .with_actor(context.actor_id.clone())
                    .with_session(context.session_id.clone())
                    .with_source(context.source_address.clone())
                    .with_detail("patternsStripped", serde_json::json!(stripped)),
            )
            .await?;
            self.raise_detection(Detection {
                alert_type: AlertType::InjectionAttempt,
                severity: Severity::Warning,
                actor_id: Some(context.actor_id.clone()),
                source_address: Some(context.source_address.clone()),
                evidence: serde_json::json!({ "patternsStripped": stripped }),
                features: None,
            })
            .await;
        }

        Ok(cleaned)
    }

    /// Mask sensitive fields on an outbound payload the context may not view
    ///
    /// Never blocks the response: scanner or masking failure logs an error,
    /// emits an event, and returns the original payload.
    pub async fn sanitize_outbound(
        &self,
        payload: &serde_json::Value,
        context: &SecurityContext,
    ) -> serde_json::Value {
        let findings = match self.scanner.scan(payload) {
            Ok(findings) => findings,
            Err(e) => {
                tracing::error!(error = %e, "Outbound sensitive-data scan failed");
                self.record_degraded("scan", &e, context).await;
                return payload.clone();
            }
        };

        let to_mask: Vec<_> = findings
            .into_iter()
            .filter(|f| f.category.required_clearance() > context.clearance_level)
            .collect();
        if to_mask.is_empty() {
            return payload.clone();
        }

        match self.scanner.mask(payload, &to_mask) {
            Ok(masked) => {
                if let Err(e) = self
                    .record_event(
                        SecurityEvent::new(EventType::DataMasked, Severity::Info)
                            .with_actor(context.actor_id.clone())
                            .with_session(context.session_id.clone())
                            .with_detail("maskedFields", serde_json::json!(to_mask.len())),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "Failed to record masking event");
                }
                masked
            }
            Err(e) => {
                tracing::error!(error = %e, "Masking failed, returning original payload");
                self.record_degraded("mask", &e, context).await;
                payload.clone()
            }
        }
    }

    async fn record_degraded(&self, stage: &str, error: &SecurityError, ctx: &SecurityContext) {
        let event = SecurityEvent::new(EventType::SystemError, Severity::High)
            .with_actor(ctx.actor_id.clone())
            .with_detail("stage", serde_json::json!(stage))
            .with_detail("error", serde_json::json!(error.to_string()));
        if let Err(e) = self.record_event(event).await {
            tracing::error!(error = %e, "Failed to record degraded-sanitization event");
        }
    }

    /// End a session at the actor's request
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        self.invalidate_session(session_id, "logout").await
    }

    /// Forcibly revoke a session
    pub async fn revoke_session(&self, session_id: &str) -> Result<()> {
        self.invalidate_session(session_id, "revoked").await
    }

    async fn invalidate_session(&self, session_id: &str, reason: &str) -> Result<()> {
        let actor_id = {
            let mut sessions = self.sessions.write().await;
            let session = sessions.get_mut(session_id).ok_or_else(|| {
                SecurityError::authentication(codes::INVALID_SESSION, "unknown session")
            })?;
            session.valid = false;
            session.actor_id.clone()
        };

        self.record_event(
            SecurityEvent::new(EventType::SessionRevoked, Severity::Info)
                .with_actor(actor_id)
                .with_session(session_id)
                .with_detail("reason", serde_json::json!(reason)),
        )
        .await
    }

    /// Fan an event out to the audit trail and the detection pipeline
    ///
    /// Audit failures degrade to a critical marker event rather than
    /// dropping the fact that something happened.
    pub async fn record_event(&self, event: SecurityEvent) -> Result<()> {
        self.append_audited(event.clone()).await;

        let detections = self.detector.observe(&event).await;
        for detection in detections {
            self.raise_detection(detection).await;
        }
        Ok(())
    }

    async fn append_audited(&self, event: SecurityEvent) {
        match self.audit.append(event).await {
            Ok(ack) => {
                if ack.should_flush {
                    if let Err(e) = self.audit.flush().await {
                        tracing::warn!(error = %e, "Opportunistic audit flush failed");
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Audit append failed, writing degraded marker");
                let marker = SecurityEvent::new(EventType::SystemError, Severity::Critical)
                    .with_detail("component", serde_json::json!("audit"))
                    .with_detail("error", serde_json::json!(e.to_string()));
                if let Err(e) = self.audit.append(marker).await {
                    tracing::error!(error = %e, "Degraded audit marker also failed");
                }
            }
        }
    }

    async fn raise_detection(&self, detection: Detection) -> RaiseOutcome {
        let severity = detection.severity;
        let actor_id = detection.actor_id.clone();
        let source = detection.source_address.clone();
        let alert_type = detection.alert_type;

        let outcome = self.alerts.raise(detection).await;

        if !outcome.deduplicated {
            let mut event = SecurityEvent::new(EventType::AlertRaised, severity)
                .with_detail("alertId", serde_json::json!(outcome.alert_id))
                .with_detail("alertType", serde_json::json!(format!("{:?}", alert_type)));
            if let Some(actor) = &actor_id {
                event = event.with_actor(actor.clone());
            }
            if let Some(source) = &source {
                event = event.with_source(source.clone());
            }
            self.append_audited(event).await;
        }

        if outcome.incident_opened {
            if let Some(incident_id) = &outcome.incident_id {
                let mut event = SecurityEvent::new(EventType::IncidentOpened, Severity::High)
                    .with_detail("incidentId", serde_json::json!(incident_id))
                    .with_detail("alertId", serde_json::json!(outcome.alert_id));
                if let Some(actor) = &actor_id {
                    event = event.with_actor(actor.clone());
                }
                self.append_audited(event).await;
            }
        }

        outcome
    }

    /// Verify the audit chain end to end and record the result
    ///
    /// An integrity failure raises a critical alert.
    pub async fn run_integrity_check(&self) -> Result<IntegrityReport> {
        let report = self.audit.verify_integrity(None).await?;

        self.append_audited(
            SecurityEvent::new(EventType::AuditSelfTest, Severity::Info)
                .with_detail("verified", serde_json::json!(report.verified))
                .with_detail("totalEntries", serde_json::json!(report.total_entries))
                .with_detail("violations", serde_json::json!(report.violations.len())),
        )
        .await;

        if !report.verified {
            self.raise_detection(Detection {
                alert_type: AlertType::IntegrityViolation,
                severity: Severity::Critical,
                actor_id: None,
                source_address: None,
                evidence: serde_json::json!({
                    "violations": report.violations.len(),
                    "totalEntries": report.total_entries,
                }),
                features: None,
            })
            .await;
        }

        Ok(report)
    }

    /// Start the background flush and maintenance loops
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(SecurityError::Config(
                    "security manager is already running".to_string(),
                ));
            }
            *running = true;
        }
        tracing::info!("Security manager started");

        let audit = self.audit.clone();
        let running = self.running.clone();
        let flush_interval = self.config.flush_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(flush_interval));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !*running.read().await {
                    break;
                }
                if let Err(e) = audit.flush().await {
                    tracing::warn!(error = %e, "Background audit flush failed, will retry");
                }
            }
            tracing::debug!("Audit flush loop stopped");
        });

        let audit = self.audit.clone();
        let detector = self.detector.clone();
        let alerts = self.alerts.clone();
        let sessions = self.sessions.clone();
        let rate_limiter = self.rate_limiter.clone();
        let running = self.running.clone();
        let retention_days = self.config.retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so maintenance
            // starts one full period after startup.
            interval.tick().await;
            loop {
                interval.tick().await;
                if !*running.read().await {
                    break;
                }

                let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
                match audit.compact(cutoff).await {
                    Ok(archived) if archived > 0 => {
                        tracing::info!(archived, "Audit compaction archived entries");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Audit compaction failed"),
                }

                let removed = detector.profiles().retention_sweep(cutoff).await;
                if removed > 0 {
                    tracing::info!(removed, "Swept stale behavior profiles");
                }

                if let Err(e) = detector.train().await {
                    tracing::warn!(error = %e, "Anomaly retraining failed");
                }

                let flagged = alerts.sweep_stale(chrono::Duration::hours(24)).await;
                if !flagged.is_empty() {
                    tracing::warn!(count = flagged.len(), "Stale high-severity alerts flagged");
                }

                let pruned = prune_state(&sessions, &rate_limiter, chrono::Utc::now()).await;
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned dead sessions and idle rate-limit windows");
                }
            }
            tracing::debug!("Maintenance loop stopped");
        });

        Ok(())
    }

    /// Drop invalid/expired sessions and idle rate-limit windows now
    ///
    /// The hourly maintenance loop runs the same sweep; this is for
    /// callers that want the memory back sooner. Returns the number of
    /// entries removed.
    pub async fn prune_stale_state(&self) -> usize {
        prune_state(&self.sessions, &self.rate_limiter, chrono::Utc::now()).await
    }

    /// Stop the background loops and flush outstanding audit entries
    pub async fn stop(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        let flushed = self.audit.flush().await?;
        tracing::info!(flushed, "Security manager stopped");
        Ok(())
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }
}
