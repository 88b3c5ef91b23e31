//! Alerts and incidents — the response side of detection
//!
//! Detector and rule output becomes a `SecurityAlert`; repeated or severe
//! alerts escalate to a `SecurityIncident`. Both are mutated only through
//! their transition APIs so illegal state moves fail instead of silently
//! corrupting the lifecycle.

use crate::anomaly::{AnomalyDetector, Detection};
use crate::behavior::FeatureVector;
use crate::error::{Result, SecurityError};
use crate::event::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Kind of alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    MultipleFailedLogins,
    NewSourceAddress,
    AnomalousBehavior,
    ResourceThreshold,
    InjectionAttempt,
    IntegrityViolation,
}

/// Alert lifecycle state
///
/// active → {acknowledged | resolved | false_positive};
/// acknowledged → {resolved | false_positive}. Resolved and false-positive
/// are terminal — there is no alert reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    FalsePositive,
}

/// A raised security alert
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    /// Unique alert identifier (alr-<uuid>)
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    /// Structured supporting data
    pub evidence: serde_json::Value,
    pub status: AlertStatus,
    /// Times the same condition re-fired while this alert was active
    pub occurrences: u32,
    /// Investigator who acknowledged, once acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    /// Resolution note, once resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
    /// Incident this alert escalated into, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Feature vector behind the detection, for false-positive feedback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
}

impl SecurityAlert {
    fn from_detection(detection: &Detection) -> Self {
        let now = chrono::Utc::now();
        Self {
            alert_id: format!("alr-{}", uuid::Uuid::new_v4()),
            alert_type: detection.alert_type,
            severity: detection.severity,
            detected_at: now,
            actor_id: detection.actor_id.clone(),
            source_address: detection.source_address.clone(),
            evidence: detection.evidence.clone(),
            status: AlertStatus::Active,
            occurrences: 1,
            acknowledged_by: None,
            resolution_note: None,
            incident_id: None,
            updated_at: now,
            features: detection.features,
        }
    }

    fn transition(&mut self, to: AlertStatus) -> Result<()> {
        let legal = matches!(
            (self.status, to),
            (AlertStatus::Active, AlertStatus::Acknowledged)
                | (AlertStatus::Active, AlertStatus::Resolved)
                | (AlertStatus::Active, AlertStatus::FalsePositive)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::FalsePositive)
        );
        if !legal {
            return Err(SecurityError::InvalidTransition(format!(
                "alert {} cannot move {:?} → {:?}",
                self.alert_id, self.status, to
            )));
        }
        self.status = to;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }
}

/// Incident lifecycle state
///
/// open → investigating → contained → mitigated → closed. Forward-only;
/// a closed incident can be explicitly reopened to investigating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Contained,
    Mitigated,
    Closed,
}

impl IncidentStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Investigating => 1,
            Self::Contained => 2,
            Self::Mitigated => 3,
            Self::Closed => 4,
        }
    }
}

/// Operator-tracked response unit grouping related alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIncident {
    /// Unique incident identifier (inc-<uuid>)
    pub incident_id: String,
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub related_alert_ids: Vec<String>,
    /// Transition notes, newest last
    pub notes: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SecurityIncident {
    fn new(title: impl Into<String>, severity: Severity, alert_ids: Vec<String>) -> Self {
        Self {
            incident_id: format!("inc-{}", uuid::Uuid::new_v4()),
            title: title.into(),
            severity,
            status: IncidentStatus::Open,
            related_alert_ids: alert_ids,
            notes: Vec::new(),
            created_at: chrono::Utc::now(),
            closed_at: None,
        }
    }

    fn advance(&mut self, to: IncidentStatus, note: Option<String>) -> Result<()> {
        if to.rank() <= self.status.rank() {
            return Err(SecurityError::InvalidTransition(format!(
                "incident {} cannot move {:?} → {:?}",
                self.incident_id, self.status, to
            )));
        }
        self.status = to;
        if to == IncidentStatus::Closed {
            self.closed_at = Some(chrono::Utc::now());
        }
        if let Some(note) = note {
            self.notes.push(note);
        }
        Ok(())
    }

    fn reopen(&mut self, note: Option<String>) -> Result<()> {
        if self.status != IncidentStatus::Closed {
            return Err(SecurityError::InvalidTransition(format!(
                "incident {} is not closed",
                self.incident_id
            )));
        }
        self.status = IncidentStatus::Investigating;
        self.closed_at = None;
        self.notes.push(note.unwrap_or_else(|| "reopened".to_string()));
        Ok(())
    }
}

/// Outcome of raising a detection
#[derive(Debug, Clone)]
pub struct RaiseOutcome {
    pub alert_id: String,
    /// Incident opened (or already linked) for this alert
    pub incident_id: Option<String>,
    /// True when this raise opened the incident
    pub incident_opened: bool,
    /// True when the detection merged into an existing active alert
    pub deduplicated: bool,
}

/// Converts detections into alerts, deduplicates, and escalates
pub struct AlertManager {
    alerts: RwLock<HashMap<String, SecurityAlert>>,
    incidents: RwLock<HashMap<String, SecurityIncident>>,
    detector: Arc<AnomalyDetector>,
}

impl AlertManager {
    pub fn new(detector: Arc<AnomalyDetector>) -> Self {
        Self {
            alerts: RwLock::new(HashMap::new()),
            incidents: RwLock::new(HashMap::new()),
            detector,
        }
    }

    /// Raise an alert for a detection
    ///
    /// Dedupes into an existing active alert with the same type, actor,
    /// and source: occurrence count and evidence merge, and the severity
    /// rises if the new detection is more severe. High/critical alerts
    /// auto-create exactly one linked incident.
    pub async fn raise(&self, detection: Detection) -> RaiseOutcome {
        let mut alerts = self.alerts.write().await;

        let existing_id = alerts
            .values()
            .find(|a| {
                a.status == AlertStatus::Active
                    && a.alert_type == detection.alert_type
                    && a.actor_id == detection.actor_id
                    && a.source_address == detection.source_address
            })
            .map(|a| a.alert_id.clone());

        let deduplicated = existing_id.is_some();
        let alert_id = match existing_id {
            Some(id) => id,
            None => {
                let alert = SecurityAlert::from_detection(&detection);
                let id = alert.alert_id.clone();
                tracing::warn!(
                    alert = %id,
                    kind = ?alert.alert_type,
                    severity = %alert.severity,
                    actor = alert.actor_id.as_deref().unwrap_or("-"),
                    "Security alert raised"
                );
                alerts.insert(id.clone(), alert);
                id
            }
        };

        let mut incident_id = None;
        let mut incident_opened = false;
        let mut opened_incident = None;
        if let Some(alert) = alerts.get_mut(&alert_id) {
            if deduplicated {
                alert.occurrences += 1;
                alert.evidence = detection.evidence.clone();
                if detection.severity > alert.severity {
                    alert.severity = detection.severity;
                }
                alert.updated_at = chrono::Utc::now();
            }

            // Auto-escalate high/critical alerts to exactly one incident
            incident_id = alert.incident_id.clone();
            if incident_id.is_none() && alert.severity >= Severity::High {
                let incident = SecurityIncident::new(
                    format!("Auto-escalated: {:?}", alert.alert_type),
                    alert.severity,
                    vec![alert_id.clone()],
                );
                let id = incident.incident_id.clone();
                alert.incident_id = Some(id.clone());
                tracing::warn!(incident = %id, alert = %alert_id, "Incident auto-opened");
                incident_id = Some(id);
                incident_opened = true;
                opened_incident = Some(incident);
            }
        }
        if let Some(incident) = opened_incident {
            self.incidents
                .write()
                .await
                .insert(incident.incident_id.clone(), incident);
        }

        RaiseOutcome {
            alert_id,
            incident_id,
            incident_opened,
            deduplicated,
        }
    }

    /// Acknowledge an active alert
    pub async fn acknowledge(&self, alert_id: &str, investigator: &str) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .get_mut(alert_id)
            .ok_or_else(|| SecurityError::NotFound(format!("alert {}", alert_id)))?;
        alert.transition(AlertStatus::Acknowledged)?;
        alert.acknowledged_by = Some(investigator.to_string());
        Ok(())
    }

    /// Resolve an alert with a note
    pub async fn resolve(&self, alert_id: &str, note: &str) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .get_mut(alert_id)
            .ok_or_else(|| SecurityError::NotFound(format!("alert {}", alert_id)))?;
        alert.transition(AlertStatus::Resolved)?;
        alert.resolution_note = Some(note.to_string());
        Ok(())
    }

    /// Mark an alert as a false positive
    ///
    /// The alert's feature vector is fed back to the detector as a
    /// negative training example.
    pub async fn mark_false_positive(&self, alert_id: &str) -> Result<()> {
        let features = {
            let mut alerts = self.alerts.write().await;
            let alert = alerts
                .get_mut(alert_id)
                .ok_or_else(|| SecurityError::NotFound(format!("alert {}", alert_id)))?;
            alert.transition(AlertStatus::FalsePositive)?;
            alert.features
        };
        if let Some(features) = features {
            self.detector.add_negative_example(features).await;
        }
        Ok(())
    }

    /// Fetch one alert
    pub async fn get_alert(&self, alert_id: &str) -> Option<SecurityAlert> {
        self.alerts.read().await.get(alert_id).cloned()
    }

    /// List alerts, optionally filtered by minimum severity and status,
    /// newest first
    pub async fn list_alerts(
        &self,
        min_severity: Option<Severity>,
        status: Option<AlertStatus>,
    ) -> Vec<SecurityAlert> {
        let alerts = self.alerts.read().await;
        let mut result: Vec<SecurityAlert> = alerts
            .values()
            .filter(|a| min_severity.map_or(true, |s| a.severity >= s))
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        result
    }

    /// Manually open an incident
    pub async fn open_incident(
        &self,
        title: &str,
        severity: Severity,
        alert_ids: Vec<String>,
    ) -> SecurityIncident {
        let incident = SecurityIncident::new(title, severity, alert_ids);
        let id = incident.incident_id.clone();
        self.incidents
            .write()
            .await
            .insert(id, incident.clone());
        incident
    }

    /// Advance an incident's status, optionally with a note
    pub async fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        note: Option<String>,
    ) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(incident_id)
            .ok_or_else(|| SecurityError::NotFound(format!("incident {}", incident_id)))?;
        incident.advance(status, note)
    }

    /// Explicitly reopen a closed incident
    pub async fn reopen_incident(&self, incident_id: &str, note: Option<String>) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(incident_id)
            .ok_or_else(|| SecurityError::NotFound(format!("incident {}", incident_id)))?;
        incident.reopen(note)
    }

    /// Fetch one incident
    pub async fn get_incident(&self, incident_id: &str) -> Option<SecurityIncident> {
        self.incidents.read().await.get(incident_id).cloned()
    }

    /// List all incidents, newest first
    pub async fn list_incidents(&self) -> Vec<SecurityIncident> {
        let incidents = self.incidents.read().await;
        let mut result: Vec<SecurityIncident> = incidents.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Flag active high/critical alerts with no transition within `max_age`
    ///
    /// Flagged alerts get an evidence marker and a warning log; the sweep
    /// never escalates further. Returns the flagged alert ids.
    pub async fn sweep_stale(&self, max_age: chrono::Duration) -> Vec<String> {
        let cutoff = chrono::Utc::now() - max_age;
        let mut alerts = self.alerts.write().await;
        let mut flagged = Vec::new();

        for alert in alerts.values_mut() {
            if alert.status == AlertStatus::Active
                && alert.severity >= Severity::High
                && alert.updated_at < cutoff
                && alert
                    .evidence
                    .get("staleSince")
                    .is_none()
            {
                // Flag only when the marker actually landed; evidence that
                // is not a JSON object cannot carry it and would otherwise
                // be re-reported on every sweep.
                let Some(map) = alert.evidence.as_object_mut() else {
                    continue;
                };
                map.insert(
                    "staleSince".to_string(),
                    serde_json::json!(alert.updated_at.to_rfc3339()),
                );
                tracing::warn!(
                    alert = %alert.alert_id,
                    severity = %alert.severity,
                    "Active alert stale beyond the sweep window"
                );
                flagged.push(alert.alert_id.clone());
            }
        }
        flagged
    }
}
