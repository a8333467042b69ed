//! Privacy-preserving transparency log.
//!
//! This module tracks and exposes statistics about what the agent processed
//! without storing any images, landmarks or identifying information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Transparency statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Perception results run through the pipeline
    frames_processed: AtomicU64,
    /// Results in which no face was found
    no_face_frames: AtomicU64,
    /// Frames dropped because a downstream stage was busy
    frames_dropped: AtomicU64,
    /// Frames the perception engine failed on
    perception_errors: AtomicU64,
    blinks: AtomicU64,
    yawns: AtomicU64,
    interventions: AtomicU64,
    /// Metrics records handed to the transport
    records_emitted: AtomicU64,
    /// Deliveries the transport reported as failed
    emissions_failed: AtomicU64,
    /// Successful session reconnections
    reconnects: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            no_face_frames: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            perception_errors: AtomicU64::new(0),
            blinks: AtomicU64::new(0),
            yawns: AtomicU64::new(0),
            interventions: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            emissions_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        // Try to load existing stats
        if let Err(e) = log.load() {
            warn!(error = %e, "could not load previous transparency stats");
        }

        log
    }

    /// Record a processed perception result.
    pub fn record_frame(&self, face_detected: bool) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        if !face_detected {
            self.no_face_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_perception_error(&self) {
        self.perception_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blink(&self) {
        self.blinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_yawn(&self) {
        self.yawns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intervention(&self) {
        self.interventions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record records handed to the transport.
    pub fn record_emitted(&self, count: u64) {
        self.records_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emission_failed(&self) {
        self.emissions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            no_face_frames: self.no_face_frames.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            perception_errors: self.perception_errors.load(Ordering::Relaxed),
            blinks: self.blinks.load(Ordering::Relaxed),
            yawns: self.yawns.load(Ordering::Relaxed),
            interventions: self.interventions.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            emissions_failed: self.emissions_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Frames processed: {}\n\
             - Frames without a face: {}\n\
             - Frames dropped: {}\n\
             - Perception errors: {}\n\
             - Blinks detected: {}\n\
             - Yawns detected: {}\n\
             - Interventions raised: {}\n\
             - Records emitted: {} ({} failed)\n\
             - Reconnects: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No images stored or transmitted\n\
             - Landmarks discarded after feature extraction\n\
             - Only derived scores and counts retained",
            stats.frames_processed,
            stats.no_face_frames,
            stats.frames_dropped,
            stats.perception_errors,
            stats.blinks,
            stats.yawns,
            stats.interventions,
            stats.records_emitted,
            stats.emissions_failed,
            stats.reconnects,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                frames_processed: stats.frames_processed,
                no_face_frames: stats.no_face_frames,
                blinks: stats.blinks,
                yawns: stats.yawns,
                interventions: stats.interventions,
                records_emitted: stats.records_emitted,
                reconnects: stats.reconnects,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.frames_processed
                    .store(persisted.frames_processed, Ordering::Relaxed);
                self.no_face_frames
                    .store(persisted.no_face_frames, Ordering::Relaxed);
                self.blinks.store(persisted.blinks, Ordering::Relaxed);
                self.yawns.store(persisted.yawns, Ordering::Relaxed);
                self.interventions
                    .store(persisted.interventions, Ordering::Relaxed);
                self.records_emitted
                    .store(persisted.records_emitted, Ordering::Relaxed);
                self.reconnects
                    .store(persisted.reconnects, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.frames_processed,
            &self.no_face_frames,
            &self.frames_dropped,
            &self.perception_errors,
            &self.blinks,
            &self.yawns,
            &self.interventions,
            &self.records_emitted,
            &self.emissions_failed,
            &self.reconnects,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub frames_processed: u64,
    pub no_face_frames: u64,
    pub frames_dropped: u64,
    pub perception_errors: u64,
    pub blinks: u64,
    pub yawns: u64,
    pub interventions: u64,
    pub records_emitted: u64,
    pub emissions_failed: u64,
    pub reconnects: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_processed: u64,
    no_face_frames: u64,
    blinks: u64,
    yawns: u64,
    interventions: u64,
    records_emitted: u64,
    reconnects: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
