//! Metrics records emitted on the reporting cadence.
//!
//! Two independent record kinds leave the agent: an attention record built from
//! the latest snapshot and an interaction record built from the session's
//! interaction counters. Neither contains images or landmark coordinates.

use crate::config::{Config, ConfigError};
use crate::core::classifier::EngagementSnapshot;
use crate::core::metrics::{InteractionMetrics, PlayerEvent};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Record format version.
pub const RECORD_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "engagement-agent";

/// Producer metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    /// Unique instance identifier (UUID)
    pub instance_id: String,
}

/// Privacy declaration carried by every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPrivacy {
    /// Always false: frames never leave the capture workers
    pub contains_images: bool,
    /// Always false: landmark coordinates are discarded after feature extraction
    pub contains_landmarks: bool,
    pub derived_metrics_only: bool,
}

impl Default for RecordPrivacy {
    fn default() -> Self {
        Self {
            contains_images: false,
            contains_landmarks: false,
            derived_metrics_only: true,
        }
    }
}

/// Frame-level counts accumulated between two emissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionTally {
    /// Frames with a face looking away from the screen
    pub gaze_deviations: u32,
    /// Frames without a face
    pub interruptions: u32,
}

impl AttentionTally {
    pub fn observe(&mut self, snapshot: &EngagementSnapshot) {
        if !snapshot.face_detected {
            self.interruptions = self.interruptions.saturating_add(1);
        } else if !snapshot.gaze_on_screen {
            self.gaze_deviations = self.gaze_deviations.saturating_add(1);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionRecord {
    pub record_version: String,
    pub student_id: u64,
    pub lesson_id: u64,
    pub face_detected: bool,
    pub gaze_on_screen: bool,
    pub fatigue_score: f64,
    pub attention_score: f64,
    pub blink_count: u32,
    pub yawn_count: u32,
    pub gaze_deviations: u32,
    pub interruptions: u32,
    /// RFC3339 in the configured timezone
    pub observed_at: String,
    pub producer: Producer,
    pub privacy: RecordPrivacy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub record_version: String,
    pub student_id: u64,
    pub lesson_id: u64,
    pub elapsed_seconds: u64,
    pub player_events: BTreeMap<PlayerEvent, u64>,
    pub material_clicks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// RFC3339 in the configured timezone
    pub observed_at: String,
    pub producer: Producer,
    pub privacy: RecordPrivacy,
}

/// Either kind of metrics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricsRecord {
    Attention(AttentionRecord),
    Interaction(InteractionRecord),
}

impl MetricsRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            MetricsRecord::Attention(_) => "attention",
            MetricsRecord::Interaction(_) => "interaction",
        }
    }
}

/// Records produced by one emission tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsEmission {
    pub attention: Option<AttentionRecord>,
    pub interaction: Option<InteractionRecord>,
}

impl MetricsEmission {
    pub fn is_empty(&self) -> bool {
        self.attention.is_none() && self.interaction.is_none()
    }

    pub fn into_records(self) -> Vec<MetricsRecord> {
        self.attention
            .map(MetricsRecord::Attention)
            .into_iter()
            .chain(self.interaction.map(MetricsRecord::Interaction))
            .collect()
    }
}

/// Builds metrics records stamped with producer and subject metadata.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    instance_id: Uuid,
    student_id: u64,
    lesson_id: u64,
    timezone: Tz,
}

impl RecordBuilder {
    pub fn new(student_id: u64, lesson_id: u64, timezone: Tz) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            student_id,
            lesson_id,
            timezone,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(config.student_id, config.lesson_id, config.tz()?))
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    fn producer(&self) -> Producer {
        Producer {
            name: PRODUCER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: self.instance_id.to_string(),
        }
    }

    fn stamp(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.timezone).to_rfc3339()
    }

    pub fn attention(
        &self,
        snapshot: &EngagementSnapshot,
        tally: AttentionTally,
        now: DateTime<Utc>,
    ) -> AttentionRecord {
        AttentionRecord {
            record_version: RECORD_VERSION.to_string(),
            student_id: self.student_id,
            lesson_id: self.lesson_id,
            face_detected: snapshot.face_detected,
            gaze_on_screen: snapshot.gaze_on_screen,
            fatigue_score: snapshot.fatigue_score,
            attention_score: snapshot.attention_score,
            blink_count: snapshot.blink_count,
            yawn_count: snapshot.yawn_count,
            gaze_deviations: tally.gaze_deviations,
            interruptions: tally.interruptions,
            observed_at: self.stamp(now),
            producer: self.producer(),
            privacy: RecordPrivacy::default(),
        }
    }

    pub fn interaction(&self, metrics: &InteractionMetrics, now: DateTime<Utc>) -> InteractionRecord {
        InteractionRecord {
            record_version: RECORD_VERSION.to_string(),
            student_id: self.student_id,
            lesson_id: self.lesson_id,
            elapsed_seconds: metrics.elapsed_seconds,
            player_events: metrics.player_event_counts.clone(),
            material_clicks: metrics.material_clicks,
            notes: (!metrics.notes_text.is_empty()).then(|| metrics.notes_text.clone()),
            observed_at: self.stamp(now),
            producer: self.producer(),
            privacy: RecordPrivacy::default(),
        }
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new(1, 1, Tz::UTC)
    }
}
