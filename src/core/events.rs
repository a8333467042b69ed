//! Debounced blink and yawn detection.
//!
//! A raw threshold crossing fires on every frame the eyes stay shut. Each event
//! kind therefore has a refractory window: a crossing inside the window of the
//! previous counted event is ignored.

use crate::config::DetectorConfig;
use crate::core::features::FeatureSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session-cumulative event counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounters {
    pub blink_count: u32,
    pub yawn_count: u32,
    pub last_blink_at: Option<DateTime<Utc>>,
    pub last_yawn_at: Option<DateTime<Utc>>,
}

/// Events counted by a single update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectedEvents {
    pub blink: bool,
    pub yawn: bool,
}

impl DetectedEvents {
    pub fn any(&self) -> bool {
        self.blink || self.yawn
    }
}

/// Blink and yawn counter with per-kind refractory windows.
#[derive(Debug, Clone)]
pub struct EventDetector {
    config: DetectorConfig,
    counters: EventCounters,
}

impl EventDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            counters: EventCounters::default(),
        }
    }

    /// Feed one sample observed at `now`.
    pub fn update(&mut self, sample: &FeatureSample, now: DateTime<Utc>) -> DetectedEvents {
        let mut events = DetectedEvents::default();

        if sample.eye_aspect_ratio < self.config.blink_ear_threshold
            && outside_window(self.counters.last_blink_at, now, self.config.blink_refractory)
        {
            self.counters.blink_count = self.counters.blink_count.saturating_add(1);
            self.counters.last_blink_at = Some(now);
            events.blink = true;
        }

        if sample.mouth_open_ratio > self.config.yawn_ratio_threshold
            && outside_window(self.counters.last_yawn_at, now, self.config.yawn_refractory)
        {
            self.counters.yawn_count = self.counters.yawn_count.saturating_add(1);
            self.counters.last_yawn_at = Some(now);
            events.yawn = true;
        }

        events
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }

    /// Zero the counters and forget the last event times.
    pub fn reset(&mut self) {
        self.counters = EventCounters::default();
    }
}

impl Default for EventDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

fn outside_window(last: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    let Some(last) = last else {
        return true;
    };
    // A clock stepping backwards never re-opens the window early.
    match (now - last).to_std() {
        Ok(elapsed) => elapsed > window,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::GazeOffset;
    use chrono::Duration as ChronoDuration;

    fn sample(ear: f64, mouth: f64) -> FeatureSample {
        FeatureSample {
            eye_aspect_ratio: ear,
            mouth_open_ratio: mouth,
            gaze_offset: GazeOffset::default(),
        }
    }

    #[test]
    fn test_first_crossing_counts() {
        let mut detector = EventDetector::default();
        let events = detector.update(&sample(0.1, 0.0), Utc::now());
        assert!(events.blink);
        assert!(!events.yawn);
        assert_eq!(detector.counters().blink_count, 1);
    }

    #[test]
    fn test_blink_refractory_window() {
        let mut detector = EventDetector::default();
        let t0 = Utc::now();
        let closed = sample(0.1, 0.0);

        detector.update(&closed, t0);
        detector.update(&closed, t0 + ChronoDuration::milliseconds(100));
        detector.update(&closed, t0 + ChronoDuration::milliseconds(300));
        assert_eq!(detector.counters().blink_count, 1);

        detector.update(&closed, t0 + ChronoDuration::milliseconds(301));
        assert_eq!(detector.counters().blink_count, 2);
    }

    #[test]
    fn test_yawn_refractory_window() {
        let mut detector = EventDetector::default();
        let t0 = Utc::now();
        let yawning = sample(0.3, 0.7);

        for ms in (0..2000).step_by(100) {
            detector.update(&yawning, t0 + ChronoDuration::milliseconds(ms));
        }
        assert_eq!(detector.counters().yawn_count, 1);

        detector.update(&yawning, t0 + ChronoDuration::milliseconds(2100));
        assert_eq!(detector.counters().yawn_count, 2);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let mut detector = EventDetector::default();
        let events = detector.update(&sample(0.20, 0.60), Utc::now());
        assert!(!events.any());
    }

    #[test]
    fn test_backwards_clock_does_not_double_count() {
        let mut detector = EventDetector::default();
        let t0 = Utc::now();
        detector.update(&sample(0.1, 0.0), t0);
        detector.update(&sample(0.1, 0.0), t0 - ChronoDuration::seconds(5));
        assert_eq!(detector.counters().blink_count, 1);
    }

    #[test]
    fn test_reset_clears_timestamps() {
        let mut detector = EventDetector::default();
        let t0 = Utc::now();
        detector.update(&sample(0.1, 0.7), t0);
        detector.reset();
        assert_eq!(detector.counters(), &EventCounters::default());

        // The window is gone with the timestamp.
        let events = detector.update(&sample(0.1, 0.7), t0 + ChronoDuration::milliseconds(10));
        assert!(events.blink && events.yawn);
    }

    #[test]
    fn test_custom_thresholds() {
        let mut detector = EventDetector::new(DetectorConfig {
            blink_ear_threshold: 0.25,
            ..DetectorConfig::default()
        });
        assert!(detector.update(&sample(0.22, 0.0), Utc::now()).blink);
    }
}
