//! Core inference for the engagement agent.
//!
//! This module contains:
//! - Geometric feature extraction from landmarks
//! - Debounced blink and yawn detection
//! - Fatigue and attention classification
//! - Cooldown-gated interventions
//! - Interaction metrics and the records built from them

pub mod classifier;
pub mod clock;
pub mod events;
pub mod features;
pub mod interventions;
pub mod metrics;
pub mod records;

// Re-export commonly used types
pub use classifier::{EngagementClassifier, EngagementSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{DetectedEvents, EventCounters, EventDetector};
pub use features::{extract_features, FeatureSample, GazeOffset};
pub use interventions::{Category, Intervention, InterventionThrottler};
pub use metrics::{InteractionMetrics, PlayerEvent, UserAction};
pub use records::{
    AttentionRecord, AttentionTally, InteractionRecord, MetricsEmission, MetricsRecord,
    RecordBuilder, PRODUCER_NAME, RECORD_VERSION,
};
