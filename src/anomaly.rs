//! Anomaly detection over behavior-profile features
//!
//! The outlier model sits behind a narrow train/score seam so the concrete
//! algorithm is swappable without touching the security manager or the
//! alert manager. Scoring before the first training pass abstains rather
//! than fabricating a value; retraining swaps the model reference
//! atomically so scoring is safe concurrently with training.

use crate::behavior::{BehaviorStore, FeatureVector, FEATURE_COUNT};
use crate::config::SecurityConfig;
use crate::error::Result;
use crate::event::{EventType, SecurityEvent, Severity};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A trained outlier-scoring model
///
/// More negative scores indicate more unusual behavior relative to the
/// training data.
pub trait AnomalyModel: Send + Sync {
    /// Score a feature vector
    fn score(&self, features: &FeatureVector) -> f64;

    /// Number of samples the model was trained on
    fn trained_on(&self) -> usize;
}

/// Builds a model from training samples
pub trait ModelTrainer: Send + Sync {
    fn train(&self, samples: &[FeatureVector]) -> Result<Arc<dyn AnomalyModel>>;
}

/// Gaussian per-feature outlier model
///
/// Stores mean and standard deviation per feature; the score is the
/// negated mean z-distance across features, so a vector matching the
/// training distribution scores near zero and outliers go negative.
pub struct GaussianOutlierModel {
    means: [f64; FEATURE_COUNT],
    std_devs: [f64; FEATURE_COUNT],
    sample_count: usize,
}

impl AnomalyModel for GaussianOutlierModel {
    fn score(&self, features: &FeatureVector) -> f64 {
        let values = features.values();
        let mut total = 0.0;
        for i in 0..FEATURE_COUNT {
            let sd = self.std_devs[i].max(1e-9);
            total += ((values[i] - self.means[i]) / sd).abs();
        }
        -(total / FEATURE_COUNT as f64)
    }

    fn trained_on(&self) -> usize {
        self.sample_count
    }
}

/// Default trainer producing `GaussianOutlierModel`s
#[derive(Default)]
pub struct GaussianTrainer;

impl ModelTrainer for GaussianTrainer {
    fn train(&self, samples: &[FeatureVector]) -> Result<Arc<dyn AnomalyModel>> {
        let n = samples.len().max(1) as f64;
        let mut means = [0.0; FEATURE_COUNT];
        for sample in samples {
            for (i, v) in sample.values().iter().enumerate() {
                means[i] += v / n;
            }
        }

        let mut std_devs = [0.0; FEATURE_COUNT];
        for sample in samples {
            for (i, v) in sample.values().iter().enumerate() {
                std_devs[i] += (v - means[i]).powi(2) / n;
            }
        }
        for sd in &mut std_devs {
            *sd = sd.sqrt();
        }

        Ok(Arc::new(GaussianOutlierModel {
            means,
            std_devs,
            sample_count: samples.len(),
        }))
    }
}

/// A rule or model finding that should become an alert
#[derive(Debug, Clone)]
pub struct Detection {
    pub alert_type: crate::alert::AlertType,
    pub severity: Severity,
    pub actor_id: Option<String>,
    pub source_address: Option<String>,
    pub evidence: serde_json::Value,
    /// Feature vector behind the detection, for false-positive feedback
    pub features: Option<FeatureVector>,
}

/// Behavioral anomaly detector with rule-based short circuits
///
/// `observe` is the single intake: it folds the event into the actor's
/// profile and returns any rule or model detections. The model reference
/// lives behind a `RwLock` and is replaced wholesale after training
/// completes, so in-flight scoring always sees a complete model.
pub struct AnomalyDetector {
    profiles: Arc<BehaviorStore>,
    trainer: Arc<dyn ModelTrainer>,
    model: RwLock<Option<Arc<dyn AnomalyModel>>>,
    /// Feature vectors fed back from false-positive alerts, excluded from
    /// future training sets
    negative_examples: RwLock<Vec<FeatureVector>>,
    config: SecurityConfig,
}

impl AnomalyDetector {
    pub fn new(profiles: Arc<BehaviorStore>, config: SecurityConfig) -> Self {
        Self::with_trainer(profiles, Arc::new(GaussianTrainer), config)
    }

    /// Use a custom model strategy
    pub fn with_trainer(
        profiles: Arc<BehaviorStore>,
        trainer: Arc<dyn ModelTrainer>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            profiles,
            trainer,
            model: RwLock::new(None),
            negative_examples: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Ingest an event: update the actor's profile and run every check
    ///
    /// Rule checks run regardless of model state; the model check abstains
    /// until the first training pass.
    pub async fn observe(&self, event: &SecurityEvent) -> Vec<Detection> {
        use crate::alert::AlertType;
        let mut detections = Vec::new();

        // Snapshot before folding so the new-source check sees the profile
        // as it was when the event arrived.
        let pre_fold = match &event.actor_id {
            Some(actor_id) => self.profiles.profile(actor_id).await,
            None => None,
        };

        let features = match (&event.actor_id, &pre_fold) {
            (Some(_), Some(profile)) => Some(profile.features(event)),
            _ => None,
        };

        self.profiles.on_event(event).await;

        if let (Some(actor_id), Some(profile)) = (&event.actor_id, &pre_fold) {
            if let Some(source) = &event.source_address {
                if profile.sample_count > 0 && profile.is_new_source(source) {
                    detections.push(Detection {
                        alert_type: AlertType::NewSourceAddress,
                        severity: Severity::Warning,
                        actor_id: Some(actor_id.clone()),
                        source_address: Some(source.clone()),
                        evidence: serde_json::json!({
                            "knownSources": profile.typical_source_addresses.len(),
                        }),
                        features,
                    });
                }
            }
        }

        // Failed-login counting includes the event just folded in
        if event.event_type == EventType::AuthenticationFailed {
            if let (Some(actor_id), Some(source)) = (&event.actor_id, &event.source_address) {
                if let Some(profile) = self.profiles.profile(actor_id).await {
                    let count = profile.failed_login_count(source, event.timestamp);
                    let threshold = self.config.failed_login_threshold;
                    if count >= threshold {
                        let severity = if count > threshold {
                            Severity::High
                        } else {
                            Severity::Medium
                        };
                        detections.push(Detection {
                            alert_type: AlertType::MultipleFailedLogins,
                            severity,
                            actor_id: Some(actor_id.clone()),
                            source_address: Some(source.clone()),
                            evidence: serde_json::json!({
                                "failedCount": count,
                                "windowMinutes": 60,
                            }),
                            features,
                        });
                    }
                }
            }
        }

        // Resource thresholds carried in event details
        for (key, limit, label) in [
            ("cpu_percent", self.config.cpu_alert_percent, "cpu"),
            ("memory_percent", self.config.memory_alert_percent, "memory"),
        ] {
            if let Some(value) = event.details.get(key).and_then(|v| v.as_f64()) {
                if value >= limit {
                    detections.push(Detection {
                        alert_type: AlertType::ResourceThreshold,
                        severity: Severity::High,
                        actor_id: event.actor_id.clone(),
                        source_address: event.source_address.clone(),
                        evidence: serde_json::json!({
                            "resource": label,
                            "observedPercent": value,
                            "limitPercent": limit,
                        }),
                        features,
                    });
                }
            }
        }

        // Model-based check, abstaining when untrained
        if let (Some(actor_id), Some(features)) = (&event.actor_id, features) {
            if let Some(score) = self.score_features(&features).await {
                if self.is_anomalous(score) {
                    detections.push(Detection {
                        alert_type: AlertType::AnomalousBehavior,
                        severity: Severity::Medium,
                        actor_id: Some(actor_id.clone()),
                        source_address: event.source_address.clone(),
                        evidence: serde_json::json!({
                            "anomalyScore": score,
                            "threshold": self.config.anomaly_threshold,
                        }),
                        features: Some(features),
                    });
                }
            }
        }

        detections
    }

    /// Score a candidate event against the actor's profile
    ///
    /// Returns None — abstains — when no model has been trained yet or the
    /// actor has no profile.
    pub async fn score(&self, actor_id: &str, event: &SecurityEvent) -> Option<f64> {
        let features = self.profiles.features_for(actor_id, event).await?;
        self.score_features(&features).await
    }

    async fn score_features(&self, features: &FeatureVector) -> Option<f64> {
        let model = {
            let guard = self.model.read().await;
            guard.clone()?
        };
        Some(model.score(features))
    }

    /// Whether a score falls below the anomaly threshold
    pub fn is_anomalous(&self, score: f64) -> bool {
        score < self.config.anomaly_threshold
    }

    /// Rebuild the model from all profiles with enough samples
    ///
    /// Returns false when there is not enough data and the existing model
    /// (if any) stays in place. The new model is swapped in atomically
    /// after training completes.
    pub async fn train(&self) -> Result<bool> {
        let mut samples = self
            .profiles
            .training_samples(self.config.min_training_samples)
            .await;

        {
            let negatives = self.negative_examples.read().await;
            if !negatives.is_empty() {
                samples.retain(|s| !negatives.contains(s));
            }
        }

        if samples.len() < self.config.min_training_samples {
            tracing::debug!(
                available = samples.len(),
                required = self.config.min_training_samples,
                "Skipping anomaly training, not enough samples"
            );
            return Ok(false);
        }

        let trained = self.trainer.train(&samples)?;
        tracing::info!(samples = trained.trained_on(), "Anomaly model retrained");

        let mut model = self.model.write().await;
        *model = Some(trained);
        Ok(true)
    }

    /// Whether a model is available for scoring
    pub async fn is_trained(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Feed a false-positive alert's feature vector back as a negative
    /// training example
    pub async fn add_negative_example(&self, features: FeatureVector) {
        let mut negatives = self.negative_examples.write().await;
        negatives.push(features);
    }

    /// The profile store backing this detector
    pub fn profiles(&self) -> &Arc<BehaviorStore> {
        &self.profiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertType;

    fn data_access(actor: &str, source: &str) -> SecurityEvent {
        SecurityEvent::new(EventType::DataAccess, Severity::Info)
            .with_actor(actor)
            .with_source(source)
    }

    fn failed_login(actor: &str, source: &str) -> SecurityEvent {
        SecurityEvent::new(EventType::AuthenticationFailed, Severity::Warning)
            .with_actor(actor)
            .with_source(source)
    }

    fn detector() -> AnomalyDetector {
        let config = SecurityConfig::default();
        AnomalyDetector::new(Arc::new(BehaviorStore::new(config.clone())), config)
    }

    #[tokio::test]
    async fn test_score_abstains_before_training() {
        let det = detector();
        det.observe(&data_access("u1", "10.0.0.1")).await;

        let event = data_access("u1", "10.0.0.1");
        assert!(det.score("u1", &event).await.is_none());
    }

    #[tokio::test]
    async fn test_train_skips_below_minimum() {
        let det = detector();
        assert!(!det.train().await.unwrap());
        assert!(!det.is_trained().await);
    }

    #[tokio::test]
    async fn test_train_then_score() {
        let det = detector();
        for _ in 0..20 {
            det.observe(&data_access("u1", "10.0.0.1")).await;
        }
        assert!(det.train().await.unwrap());
        assert!(det.is_trained().await);

        let score = det.score("u1", &data_access("u1", "10.0.0.1")).await.unwrap();
        assert!(score.is_finite());
    }

    #[test]
    fn test_gaussian_model_scores_outliers_lower() {
        let trainer = GaussianTrainer;
        let samples: Vec<FeatureVector> = (0..50)
            .map(|i| FeatureVector([9.0 + (i % 2) as f64, 2.0, 5.0, 3.0, 8.0]))
            .collect();
        let model = trainer.train(&samples).unwrap();

        let typical = model.score(&FeatureVector([9.0, 2.0, 5.0, 3.0, 8.0]));
        let outlier = model.score(&FeatureVector([3.0, 6.0, 90.0, 1.0, 1.0]));
        assert!(outlier < typical);
    }

    #[tokio::test]
    async fn test_failed_login_rule_medium_then_high() {
        let det = detector();

        // First four failures stay below the threshold of 5
        for _ in 0..4 {
            let detections = det.observe(&failed_login("u1", "1.2.3.4")).await;
            assert!(detections
                .iter()
                .all(|d| d.alert_type != AlertType::MultipleFailedLogins));
        }

        // Fifth failure crosses the threshold at medium severity
        let detections = det.observe(&failed_login("u1", "1.2.3.4")).await;
        let hit = detections
            .iter()
            .find(|d| d.alert_type == AlertType::MultipleFailedLogins)
            .unwrap();
        assert_eq!(hit.severity, Severity::Medium);

        // Sixth raises to high
        let detections = det.observe(&failed_login("u1", "1.2.3.4")).await;
        let hit = detections
            .iter()
            .find(|d| d.alert_type == AlertType::MultipleFailedLogins)
            .unwrap();
        assert_eq!(hit.severity, Severity::High);
    }

    #[tokio::test]
    async fn test_failed_logins_counted_per_source() {
        let det = detector();
        for _ in 0..5 {
            det.observe(&failed_login("u1", "1.2.3.4")).await;
        }
        // Same actor, different source: its own window starts fresh
        let detections = det.observe(&failed_login("u1", "9.9.9.9")).await;
        assert!(detections
            .iter()
            .all(|d| d.alert_type != AlertType::MultipleFailedLogins));
    }

    #[tokio::test]
    async fn test_new_source_rule() {
        let det = detector();
        for _ in 0..5 {
            det.observe(&data_access("u1", "10.0.0.1")).await;
        }

        let detections = det.observe(&data_access("u1", "203.0.113.9")).await;
        assert!(detections
            .iter()
            .any(|d| d.alert_type == AlertType::NewSourceAddress));

        // Second appearance of the same source is no longer new
        let detections = det.observe(&data_access("u1", "203.0.113.9")).await;
        assert!(detections
            .iter()
            .all(|d| d.alert_type != AlertType::NewSourceAddress));
    }

    #[tokio::test]
    async fn test_first_event_not_flagged_as_new_source() {
        let det = detector();
        let detections = det.observe(&data_access("fresh", "10.0.0.1")).await;
        assert!(detections
            .iter()
            .all(|d| d.alert_type != AlertType::NewSourceAddress));
    }

    #[tokio::test]
    async fn test_resource_threshold_rule() {
        let det = detector();
        let event = SecurityEvent::new(EventType::SystemError, Severity::Warning)
            .with_detail("cpu_percent", serde_json::json!(97.5));
        let detections = det.observe(&event).await;
        let hit = detections
            .iter()
            .find(|d| d.alert_type == AlertType::ResourceThreshold)
            .unwrap();
        assert_eq!(hit.severity, Severity::High);
        assert_eq!(hit.evidence["resource"], "cpu");
    }

    #[tokio::test]
    async fn test_resource_below_threshold_quiet() {
        let det = detector();
        let event = SecurityEvent::new(EventType::SystemError, Severity::Warning)
            .with_detail("memory_percent", serde_json::json!(40.0));
        let detections = det.observe(&event).await;
        assert!(detections.is_empty());
    }

    #[tokio::test]
    async fn test_negative_examples_excluded_from_training() {
        let det = detector();
        for _ in 0..20 {
            det.observe(&data_access("u1", "10.0.0.1")).await;
        }

        // Feed every sample back as a negative example
        for s in det.profiles().training_samples(1).await {
            det.add_negative_example(s).await;
        }

        assert!(!det.train().await.unwrap());
    }
}
