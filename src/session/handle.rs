//! Worker threads for a live capture session.
//!
//! A session runs two threads: one pulling frames from the source and one
//! running the perception engine. They meet on a zero-capacity channel, so a
//! frame that arrives while inference is still busy is dropped rather than
//! queued. Results go to the agent loop through a capacity-1 channel with the
//! same drop-when-busy rule.

use crate::capture::{Frame, FrameSource, PerceptionEngine, PerceptionResult};
use crate::transparency::SharedTransparencyLog;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How long the inference thread waits for a frame before re-checking the running flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause between polls when the source has no frame ready.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Counters shared between the workers and the manager.
#[derive(Debug)]
pub struct WorkerStats {
    started: Instant,
    /// Milliseconds since `started` of the last frame, plus one; zero means none yet
    last_frame: AtomicU64,
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    perception_errors: AtomicU64,
    source_live: AtomicBool,
}

impl WorkerStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_frame: AtomicU64::new(0),
            frames_captured: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            perception_errors: AtomicU64::new(0),
            source_live: AtomicBool::new(true),
        }
    }

    fn mark_frame(&self) {
        let offset = self.started.elapsed().as_millis() as u64 + 1;
        self.last_frame.store(offset, Ordering::Relaxed);
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the last frame, or since the session started if none arrived yet.
    pub fn silence(&self) -> Duration {
        let last = match self.last_frame.load(Ordering::Relaxed) {
            0 => Duration::ZERO,
            offset => Duration::from_millis(offset - 1),
        };
        self.started.elapsed().saturating_sub(last)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn perception_errors(&self) -> u64 {
        self.perception_errors.load(Ordering::Relaxed)
    }

    pub fn source_live(&self) -> bool {
        self.source_live.load(Ordering::Relaxed)
    }
}

/// Owns the frame source, the perception engine and the threads driving them.
///
/// Dropping the handle stops the workers and closes both collaborators.
pub struct SessionHandle {
    source_name: String,
    running: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    capture_thread: Option<JoinHandle<Box<dyn FrameSource>>>,
    inference_thread: Option<JoinHandle<Box<dyn PerceptionEngine>>>,
}

impl SessionHandle {
    /// Start the capture and inference workers.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        engine: Box<dyn PerceptionEngine>,
        results: mpsc::Sender<PerceptionResult>,
        log: SharedTransparencyLog,
    ) -> Self {
        let source_name = source.name();
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(WorkerStats::new());
        let (frame_tx, frame_rx) = bounded::<Frame>(0);

        let capture_thread = {
            let running = running.clone();
            let stats = stats.clone();
            let log = log.clone();
            thread::spawn(move || capture_loop(source, frame_tx, running, stats, log))
        };

        let inference_thread = {
            let running = running.clone();
            let stats = stats.clone();
            thread::spawn(move || inference_loop(engine, frame_rx, results, running, stats, log))
        };

        Self {
            source_name,
            running,
            stats,
            capture_thread: Some(capture_thread),
            inference_thread: Some(inference_thread),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Check the source is attached and has produced a frame recently.
    pub fn probe(&self, stall_timeout: Duration) -> Result<(), String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err("session workers are stopped".to_string());
        }
        if !self.stats.source_live() {
            return Err(format!("{} is no longer live", self.source_name));
        }
        let silence = self.stats.silence();
        if silence > stall_timeout {
            return Err(format!(
                "no frame from {} for {}ms",
                self.source_name,
                silence.as_millis()
            ));
        }
        Ok(())
    }

    /// Stop the workers, then close the source and the engine.
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.capture_thread.take() {
            match handle.join() {
                Ok(mut source) => source.close(),
                Err(_) => warn!(source = %self.source_name, "capture thread panicked"),
            }
        }
        if let Some(handle) = self.inference_thread.take() {
            match handle.join() {
                Ok(mut engine) => engine.close(),
                Err(_) => warn!("inference thread panicked"),
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("source_name", &self.source_name)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("stats", &self.stats)
            .finish()
    }
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    frames: Sender<Frame>,
    running: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    log: SharedTransparencyLog,
) -> Box<dyn FrameSource> {
    while running.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                stats.mark_frame();
                match frames.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        log.record_frame_dropped();
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Ok(None) => thread::sleep(IDLE_POLL),
            Err(e) => {
                warn!(source = %source.name(), error = %e, "frame source failed");
                stats.source_live.store(false, Ordering::SeqCst);
                break;
            }
        }

        if !source.is_live() {
            stats.source_live.store(false, Ordering::SeqCst);
            break;
        }
    }
    source
}

fn inference_loop(
    mut engine: Box<dyn PerceptionEngine>,
    frames: Receiver<Frame>,
    results: mpsc::Sender<PerceptionResult>,
    running: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    log: SharedTransparencyLog,
) -> Box<dyn PerceptionEngine> {
    while running.load(Ordering::SeqCst) {
        let frame = match frames.recv_timeout(RECV_TIMEOUT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let landmarks = match engine.detect(&frame) {
            Ok(landmarks) => landmarks,
            Err(e) => {
                debug!(frame = frame.sequence, error = %e, "perception failed on frame");
                stats.perception_errors.fetch_add(1, Ordering::Relaxed);
                log.record_perception_error();
                continue;
            }
        };

        let result = PerceptionResult {
            frame_sequence: frame.sequence,
            captured_at: frame.captured_at,
            landmarks,
        };
        match results.try_send(result) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log.record_frame_dropped();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    engine
}
