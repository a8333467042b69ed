//! Rule-based engagement classification.

use crate::config::{FatigueRules, GazeBounds};
use crate::core::events::EventCounters;
use crate::core::features::{FeatureSample, GazeOffset};
use serde::{Deserialize, Serialize};

/// Latest engagement state of the subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementSnapshot {
    pub face_detected: bool,
    pub gaze_on_screen: bool,
    /// In [0, 1]
    pub fatigue_score: f64,
    /// `gaze_on_screen` as a score: 1.0 or 0.0, nothing in between
    pub attention_score: f64,
    pub blink_count: u32,
    pub yawn_count: u32,
}

impl FatigueRules {
    /// Additive fatigue score for one sample, clamped to [0, 1].
    ///
    /// `blink_count` is the session total, so once it passes the threshold the
    /// blink penalty stays for the rest of the session.
    pub fn score(&self, sample: &FeatureSample, blink_count: u32) -> f64 {
        let ear = sample.eye_aspect_ratio;
        let mouth = sample.mouth_open_ratio;

        let rules = [
            (ear < self.eyes_closed_below, self.eyes_closed_weight),
            (
                ear >= self.eyes_closed_below && ear < self.eyes_heavy_below,
                self.eyes_heavy_weight,
            ),
            (mouth > self.yawn_above, self.yawn_weight),
            (
                mouth <= self.yawn_above && mouth > self.mouth_open_above,
                self.mouth_open_weight,
            ),
            (blink_count > self.blink_count_above, self.blink_count_weight),
        ];

        let score = rules
            .iter()
            .filter(|(applies, _)| *applies)
            .fold(0.0, |acc, (_, weight)| acc + weight);

        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }
}

impl GazeBounds {
    /// Whether the offset lies strictly inside the on-screen region.
    pub fn contains(&self, offset: &GazeOffset) -> bool {
        offset.x.abs() < self.max_abs_x && offset.y.abs() < self.max_abs_y
    }
}

/// Turns feature samples into engagement snapshots.
#[derive(Debug, Clone, Default)]
pub struct EngagementClassifier {
    fatigue: FatigueRules,
    gaze: GazeBounds,
}

impl EngagementClassifier {
    pub fn new(fatigue: FatigueRules, gaze: GazeBounds) -> Self {
        Self { fatigue, gaze }
    }

    /// Classify a frame in which a face was found.
    pub fn classify(&self, sample: &FeatureSample, counters: &EventCounters) -> EngagementSnapshot {
        let gaze_on_screen = self.gaze.contains(&sample.gaze_offset);
        EngagementSnapshot {
            face_detected: true,
            gaze_on_screen,
            fatigue_score: self.fatigue.score(sample, counters.blink_count),
            attention_score: if gaze_on_screen { 1.0 } else { 0.0 },
            blink_count: counters.blink_count,
            yawn_count: counters.yawn_count,
        }
    }

    /// Snapshot for a frame without a face. Counters carry over unchanged.
    pub fn degraded(&self, counters: &EventCounters) -> EngagementSnapshot {
        EngagementSnapshot {
            face_detected: false,
            gaze_on_screen: false,
            fatigue_score: 0.0,
            attention_score: 0.0,
            blink_count: counters.blink_count,
            yawn_count: counters.yawn_count,
        }
    }
}
