//! Per-frame wiring of feature extraction, event detection, classification and interventions.
//!
//! The pipeline is plain synchronous state. The agent loop owns it and passes
//! the current time into every call.

use crate::capture::PerceptionResult;
use crate::config::Config;
use crate::core::{
    extract_features, AttentionTally, Category, DetectedEvents, EngagementClassifier,
    EngagementSnapshot, EventCounters, EventDetector, InteractionMetrics, Intervention,
    InterventionThrottler, MetricsEmission, RecordBuilder, UserAction,
};
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

/// What one perception result changed.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub snapshot: EngagementSnapshot,
    pub events: DetectedEvents,
    /// Interventions raised by this frame
    pub raised: Vec<Intervention>,
    /// Interventions that outlived their TTL and were dropped
    pub expired: usize,
}

impl FrameOutcome {
    /// Whether the live intervention set changed.
    pub fn interventions_changed(&self) -> bool {
        !self.raised.is_empty() || self.expired > 0
    }
}

/// Engagement state of the monitored subject.
#[derive(Debug)]
pub struct EngagementPipeline {
    detector: EventDetector,
    classifier: EngagementClassifier,
    throttler: InterventionThrottler,
    metrics: InteractionMetrics,
    records: RecordBuilder,
    snapshot: EngagementSnapshot,
    tally: AttentionTally,
    face_seen: bool,
    log: SharedTransparencyLog,
}

impl EngagementPipeline {
    pub fn new(
        config: &Config,
        records: RecordBuilder,
        log: SharedTransparencyLog,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            detector: EventDetector::new(config.detector.clone()),
            classifier: EngagementClassifier::new(config.fatigue.clone(), config.gaze.clone()),
            throttler: InterventionThrottler::new(config.interventions.clone()),
            metrics: InteractionMetrics::new(started_at),
            records,
            snapshot: EngagementSnapshot::default(),
            tally: AttentionTally::default(),
            face_seen: false,
            log,
        }
    }

    /// Run one perception result through the pipeline.
    pub fn on_perception(&mut self, result: &PerceptionResult, now: DateTime<Utc>) -> FrameOutcome {
        self.metrics.tick(now);

        let (snapshot, events) = match &result.landmarks {
            Some(landmarks) => {
                let sample = extract_features(landmarks);
                let events = self.detector.update(&sample, now);
                self.face_seen = true;
                (
                    self.classifier.classify(&sample, self.detector.counters()),
                    events,
                )
            }
            None => (
                self.classifier.degraded(self.detector.counters()),
                DetectedEvents::default(),
            ),
        };

        self.log.record_frame(snapshot.face_detected);
        if events.blink {
            self.log.record_blink();
        }
        if events.yawn {
            self.log.record_yawn();
        }
        if events.any() {
            debug!(
                frame = result.frame_sequence,
                blink = events.blink,
                yawn = events.yawn,
                "event detected"
            );
        }

        self.tally.observe(&snapshot);
        self.snapshot = snapshot.clone();

        let expired = self.throttler.expire(now);
        let raised = self.throttler.evaluate(&snapshot, &self.metrics, now);
        for intervention in &raised {
            self.announce(intervention);
        }

        FrameOutcome {
            snapshot,
            events,
            raised,
            expired,
        }
    }

    /// Apply an action reported by the presentation layer.
    pub fn on_action(&mut self, action: &UserAction, now: DateTime<Utc>) {
        self.metrics.tick(now);
        self.metrics.apply(action);
        debug!(?action, "user action applied");
    }

    /// Raise an intervention on request, subject to the category cooldown.
    pub fn request_intervention(
        &mut self,
        category: Category,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Intervention> {
        let message = message.unwrap_or_else(|| category.default_message().to_string());
        let raised = self.throttler.raise(category, message, now);
        match &raised {
            Some(intervention) => self.announce(intervention),
            None => debug!(%category, "requested intervention suppressed by cooldown"),
        }
        raised
    }

    fn announce(&self, intervention: &Intervention) {
        self.log.record_intervention();
        info!(
            id = %intervention.id,
            category = %intervention.category,
            "intervention raised"
        );
    }

    /// Remove an intervention. Unknown ids are ignored.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let removed = self.throttler.dismiss(id);
        if removed {
            debug!(%id, "intervention dismissed");
        }
        removed
    }

    /// Drop interventions past their TTL.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        self.throttler.expire(now)
    }

    /// Build the records for one reporting tick.
    ///
    /// The attention record waits for the first face; the interaction record
    /// waits for the first elapsed second.
    pub fn emission(&mut self, now: DateTime<Utc>) -> MetricsEmission {
        self.metrics.tick(now);

        let attention = self.face_seen.then(|| {
            let tally = std::mem::take(&mut self.tally);
            self.records.attention(&self.snapshot, tally, now)
        });
        let interaction = (self.metrics.elapsed_seconds > 0)
            .then(|| self.records.interaction(&self.metrics, now));

        MetricsEmission {
            attention,
            interaction,
        }
    }

    /// Zero the blink and yawn counters.
    pub fn reset_counters(&mut self) {
        self.detector.reset();
        self.snapshot.blink_count = 0;
        self.snapshot.yawn_count = 0;
        info!("event counters reset");
    }

    pub fn snapshot(&self) -> &EngagementSnapshot {
        &self.snapshot
    }

    pub fn interventions(&self) -> &[Intervention] {
        self.throttler.live()
    }

    pub fn metrics(&self) -> &InteractionMetrics {
        &self.metrics
    }

    pub fn counters(&self) -> &EventCounters {
        self.detector.counters()
    }

    pub fn face_seen(&self) -> bool {
        self.face_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FaceModel;
    use crate::transparency::create_shared_log;
    use chrono::Duration;

    fn pipeline(now: DateTime<Utc>) -> EngagementPipeline {
        EngagementPipeline::new(
            &Config::default(),
            RecordBuilder::default(),
            create_shared_log(),
            now,
        )
    }

    #[test]
    fn test_no_emission_before_anything_happened() {
        let now = Utc::now();
        let mut pipeline = pipeline(now);
        assert!(pipeline.emission(now).is_empty());
    }

    #[test]
    fn test_attention_record_after_first_face() {
        let t0 = Utc::now();
        let mut pipeline = pipeline(t0);

        pipeline.on_perception(&PerceptionResult::no_face(0), t0);
        assert!(pipeline.emission(t0).attention.is_none());

        let face = FaceModel::default().landmarks();
        pipeline.on_perception(&PerceptionResult::face(1, face), t0);
        pipeline.on_perception(&PerceptionResult::no_face(2), t0);

        let emission = pipeline.emission(t0 + Duration::seconds(2));
        // Both no-face frames count: nothing was emitted for the first one.
        let attention = emission.attention.unwrap();
        assert_eq!(attention.interruptions, 2);
        assert!(emission.interaction.is_some());

        // Tallies restart after each emission.
        let next = pipeline.emission(t0 + Duration::seconds(4));
        assert_eq!(next.attention.unwrap().interruptions, 0);
    }

    #[test]
    fn test_reset_counters_updates_snapshot() {
        let t0 = Utc::now();
        let mut pipeline = pipeline(t0);
        let closed = FaceModel::default().with_ear(0.1).landmarks();
        let outcome = pipeline.on_perception(&PerceptionResult::face(0, closed), t0);
        assert!(outcome.events.blink);
        assert_eq!(pipeline.snapshot().blink_count, 1);

        pipeline.reset_counters();
        assert_eq!(pipeline.snapshot().blink_count, 0);
        assert_eq!(pipeline.counters().blink_count, 0);
    }

    #[test]
    fn test_requested_intervention_uses_default_message() {
        let t0 = Utc::now();
        let mut pipeline = pipeline(t0);
        let quiz = pipeline
            .request_intervention(Category::Quiz, None, t0)
            .unwrap();
        assert_eq!(quiz.message, Category::Quiz.default_message());
        assert!(pipeline
            .request_intervention(Category::Quiz, Some("again".into()), t0)
            .is_none());

        assert!(pipeline.dismiss(quiz.id));
        assert!(pipeline.interventions().is_empty());
    }

    #[test]
    fn test_frame_reports_expired_interventions() {
        let t0 = Utc::now();
        let mut config = Config::default();
        config.interventions.ttl = Some(std::time::Duration::from_millis(100));
        let mut pipeline =
            EngagementPipeline::new(&config, RecordBuilder::default(), create_shared_log(), t0);
        pipeline.request_intervention(Category::Quiz, None, t0).unwrap();

        let face = FaceModel::default().landmarks();
        let early = pipeline.on_perception(&PerceptionResult::face(0, face.clone()), t0);
        assert_eq!(early.expired, 0);
        assert!(!early.interventions_changed());

        let late = pipeline.on_perception(
            &PerceptionResult::face(1, face),
            t0 + Duration::milliseconds(150),
        );
        assert_eq!(late.expired, 1);
        assert!(late.interventions_changed());
        assert!(pipeline.interventions().is_empty());
    }
}
