//! Per-actor behavior profiles feeding anomaly detection
//!
//! Profiles accumulate rolling statistics — access hours, source
//! addresses, resources touched — with bounded history so an actor's
//! profile never grows without limit. Feature vectors extracted here are
//! the anomaly model's training and scoring input.

use crate::config::SecurityConfig;
use crate::event::{EventType, SecurityEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tokio::sync::RwLock;

/// Number of features per vector
pub const FEATURE_COUNT: usize = 5;

/// Feature vector for anomaly scoring
///
/// Order: hour-of-day, day-of-week, recent-activity-count,
/// activity-type diversity, event-type code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}

/// Rolling statistics for one actor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorProfile {
    pub actor_id: String,

    /// Recent access hours (0-23), bounded history
    pub typical_hours: VecDeque<u32>,

    /// Source addresses seen for this actor, capped
    pub typical_source_addresses: BTreeSet<String>,

    /// Resources touched by this actor, capped
    pub typical_resources: BTreeSet<String>,

    /// Event-type code → occurrence count
    pub event_type_counts: HashMap<u8, u64>,

    /// Recent event timestamps for activity-rate features, pruned to one hour
    pub recent_activity: VecDeque<chrono::DateTime<chrono::Utc>>,

    /// Failed-login timestamps keyed by source address, pruned to one hour
    pub failed_logins: HashMap<String, Vec<chrono::DateTime<chrono::Utc>>>,

    /// Recent feature vectors, used as training samples
    pub samples: VecDeque<FeatureVector>,

    /// Profile-level risk estimate in [0, 1]
    pub risk_score: f64,

    /// Total events observed
    pub sample_count: u64,

    pub last_seen: chrono::DateTime<chrono::Utc>,
}

const RECENT_ACTIVITY_WINDOW_MINS: i64 = 60;
const MAX_SAMPLES_PER_ACTOR: usize = 200;
/// Minimum hour observations before an hour can be called rare
const RARE_HOUR_MIN_HISTORY: usize = 10;
/// An hour seen in less than this share of history is rare
const RARE_HOUR_SHARE: f64 = 0.05;

impl BehaviorProfile {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            typical_hours: VecDeque::new(),
            typical_source_addresses: BTreeSet::new(),
            typical_resources: BTreeSet::new(),
            event_type_counts: HashMap::new(),
            recent_activity: VecDeque::new(),
            failed_logins: HashMap::new(),
            samples: VecDeque::new(),
            risk_score: 0.0,
            sample_count: 0,
            last_seen: chrono::Utc::now(),
        }
    }

    /// Extract the feature vector an event would have against this profile
    ///
    /// Computed before the event is folded in, so scoring sees the profile
    /// as it was when the event arrived.
    pub fn features(&self, event: &SecurityEvent) -> FeatureVector {
        use chrono::{Datelike, Timelike};
        let hour = event.timestamp.hour() as f64;
        let weekday = event.timestamp.weekday().num_days_from_monday() as f64;
        let window_start =
            event.timestamp - chrono::Duration::minutes(RECENT_ACTIVITY_WINDOW_MINS);
        let recent = self
            .recent_activity
            .iter()
            .filter(|t| **t >= window_start)
            .count() as f64;
        let diversity = self.event_type_counts.len() as f64;
        let code = event.event_type.code() as f64;
        FeatureVector([hour, weekday, recent, diversity, code])
    }

    /// Fold an event into the profile
    pub fn record(&mut self, event: &SecurityEvent, config: &SecurityConfig) {
        use chrono::Timelike;

        let features = self.features(event);
        self.samples.push_back(features);
        if self.samples.len() > MAX_SAMPLES_PER_ACTOR {
            self.samples.pop_front();
        }

        self.typical_hours.push_back(event.timestamp.hour());
        while self.typical_hours.len() > config.max_profile_hours {
            self.typical_hours.pop_front();
        }

        if let Some(source) = &event.source_address {
            if self.typical_source_addresses.len() < config.max_profile_sources
                || self.typical_source_addresses.contains(source)
            {
                self.typical_source_addresses.insert(source.clone());
            }
        }

        if let Some(resource) = &event.resource {
            if self.typical_resources.len() < config.max_profile_resources
                || self.typical_resources.contains(resource)
            {
                self.typical_resources.insert(resource.clone());
            }
        }

        *self
            .event_type_counts
            .entry(event.event_type.code())
            .or_insert(0) += 1;

        let window_start =
            event.timestamp - chrono::Duration::minutes(RECENT_ACTIVITY_WINDOW_MINS);
        self.recent_activity.push_back(event.timestamp);
        while self
            .recent_activity
            .front()
            .is_some_and(|t| *t < window_start)
        {
            self.recent_activity.pop_front();
        }

        if event.event_type == EventType::AuthenticationFailed {
            if let Some(source) = &event.source_address {
                let failures = self.failed_logins.entry(source.clone()).or_default();
                failures.push(event.timestamp);
                failures.retain(|t| *t >= event.timestamp - chrono::Duration::hours(1));
            }
        }

        self.sample_count += 1;
        self.last_seen = event.timestamp;
    }

    /// Whether a source address has never been seen for this actor
    pub fn is_new_source(&self, source: &str) -> bool {
        !self.typical_source_addresses.contains(source)
    }

    /// Failed logins from `source` within the rolling hour ending at `now`
    pub fn failed_login_count(
        &self,
        source: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> u32 {
        let window_start = now - chrono::Duration::hours(1);
        self.failed_logins
            .get(source)
            .map(|failures| failures.iter().filter(|t| **t >= window_start).count() as u32)
            .unwrap_or(0)
    }

    /// Whether `hour` is statistically rare for this actor
    ///
    /// Requires enough history to judge; a cold profile is never rare.
    pub fn is_rare_hour(&self, hour: u32) -> bool {
        if self.typical_hours.len() < RARE_HOUR_MIN_HISTORY {
            return false;
        }
        let occurrences = self.typical_hours.iter().filter(|h| **h == hour).count();
        (occurrences as f64) / (self.typical_hours.len() as f64) < RARE_HOUR_SHARE
    }
}

/// Thread-safe map of actor profiles
///
/// Hot-path updates are synchronous in-memory mutations under one
/// coarse lock per the concurrency model.
pub struct BehaviorStore {
    profiles: RwLock<HashMap<String, BehaviorProfile>>,
    config: SecurityConfig,
}

impl BehaviorStore {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Fold an event into its actor's profile, creating the profile on
    /// first sight. Events without an actor are ignored.
    pub async fn on_event(&self, event: &SecurityEvent) {
        let Some(actor_id) = &event.actor_id else {
            return;
        };
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(actor_id.clone())
            .or_insert_with(|| BehaviorProfile::new(actor_id.clone()));
        profile.record(event, &self.config);
    }

    /// Snapshot of one actor's profile
    pub async fn profile(&self, actor_id: &str) -> Option<BehaviorProfile> {
        let profiles = self.profiles.read().await;
        profiles.get(actor_id).cloned()
    }

    /// Feature vector an event would have against its actor's profile
    ///
    /// None when the actor has no profile yet.
    pub async fn features_for(&self, actor_id: &str, event: &SecurityEvent) -> Option<FeatureVector> {
        let profiles = self.profiles.read().await;
        profiles.get(actor_id).map(|p| p.features(event))
    }

    /// Training samples from every profile with at least `min_samples`
    pub async fn training_samples(&self, min_samples: usize) -> Vec<FeatureVector> {
        let profiles = self.profiles.read().await;
        profiles
            .values()
            .filter(|p| p.samples.len() >= min_samples)
            .flat_map(|p| p.samples.iter().copied())
            .collect()
    }

    /// Number of tracked actors
    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }

    /// Remove profiles not seen since `cutoff` — the only way a profile
    /// is ever removed
    pub async fn retention_sweep(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let mut profiles = self.profiles.write().await;
        let before = profiles.len();
        profiles.retain(|_, p| p.last_seen >= cutoff);
        let removed = before - profiles.len();
        if removed > 0 {
            tracing::info!(removed, "Behavior profiles swept by retention");
        }
        removed
    }
}
