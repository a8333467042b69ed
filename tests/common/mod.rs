//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use engagement_agent::capture::{
    CaptureDevice, CaptureError, CaptureErrorKind, FaceModel, Frame, FrameSource,
    LandmarkFrame, PerceptionBackend, PerceptionEngine, PerceptionResult,
};
use engagement_agent::config::{Config, SessionConfig};
use engagement_agent::core::MetricsRecord;
use engagement_agent::transport::{DeliveryFuture, MetricsTransport, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Session settings that keep retries and probes in the millisecond range.
pub fn fast_session() -> SessionConfig {
    SessionConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
        acquire_timeout: Duration::from_millis(300),
        reconnect_attempts: 3,
        health_check_interval: Duration::from_millis(50),
        frame_stall_timeout: Duration::from_millis(200),
    }
}

pub fn fast_config() -> Config {
    Config {
        session: fast_session(),
        metrics_interval: Duration::from_millis(50),
        ..Config::default()
    }
}

pub fn face(model: FaceModel) -> PerceptionResult {
    PerceptionResult::face(0, model.landmarks())
}

pub fn no_face() -> PerceptionResult {
    PerceptionResult::no_face(0)
}

/// How a scripted stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallMode {
    /// `next_frame` returns an error
    Error,
    /// `next_frame` keeps returning no frame
    Silent,
}

/// Open/close bookkeeping shared between a device and its streams.
#[derive(Debug, Default)]
pub struct Counters {
    pub attempts: AtomicU32,
    pub opened: AtomicU32,
    pub closed: AtomicU32,
}

impl Counters {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A camera whose open attempts follow a script.
///
/// Each `open` pops the next scripted outcome (`None` opens, `Some` fails);
/// once the script is empty every open succeeds.
pub struct ScriptedDevice {
    script: Mutex<VecDeque<Option<CaptureErrorKind>>>,
    open_delay: Duration,
    reopen_delay: Duration,
    first_stream_stall: Option<(u64, StallMode)>,
    frame_interval: Duration,
    pub counters: Arc<Counters>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            open_delay: Duration::ZERO,
            reopen_delay: Duration::ZERO,
            first_stream_stall: None,
            frame_interval: Duration::from_millis(5),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn failing(mut self, kinds: impl IntoIterator<Item = CaptureErrorKind>) -> Self {
        self.script = Mutex::new(kinds.into_iter().map(Some).collect());
        self
    }

    /// Open once, then fail with each of `kinds` in turn.
    pub fn failing_after_first(mut self, kinds: impl IntoIterator<Item = CaptureErrorKind>) -> Self {
        let script = std::iter::once(None).chain(kinds.into_iter().map(Some));
        self.script = Mutex::new(script.collect());
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Every open after the first takes `delay`.
    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// The first successfully opened stream stops after `frames` frames.
    pub fn stalling_first_stream(mut self, frames: u64, mode: StallMode) -> Self {
        self.first_stream_stall = Some((frames, mode));
        self
    }
}

impl CaptureDevice for ScriptedDevice {
    fn open(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        let attempt = self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = if attempt == 0 {
            self.open_delay
        } else {
            self.reopen_delay.max(self.open_delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        if let Some(Some(kind)) = self.script.lock().unwrap().pop_front() {
            return Err(CaptureError::new(kind, "scripted open failure"));
        }

        let previous = self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let stall = if previous == 0 {
            self.first_stream_stall
        } else {
            None
        };
        Ok(Box::new(ScriptedStream {
            sequence: 0,
            stall,
            interval: self.frame_interval,
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedStream {
    sequence: u64,
    stall: Option<(u64, StallMode)>,
    interval: Duration,
    counters: Arc<Counters>,
}

impl FrameSource for ScriptedStream {
    fn name(&self) -> String {
        "scripted camera".to_string()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        thread::sleep(self.interval);
        if let Some((limit, mode)) = self.stall {
            if self.sequence >= limit {
                return match mode {
                    StallMode::Error => Err(CaptureError::new(
                        CaptureErrorKind::DeviceBusy,
                        "scripted stream failure",
                    )),
                    StallMode::Silent => Ok(None),
                };
            }
        }
        let frame = Frame::new(self.sequence, 64, 48, Vec::new());
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A landmark model whose loads follow a script and whose engine always sees `face`.
pub struct ScriptedBackend {
    failures: Mutex<VecDeque<CaptureErrorKind>>,
    face: Option<FaceModel>,
    pub counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            face: Some(FaceModel::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn failing(mut self, kinds: impl IntoIterator<Item = CaptureErrorKind>) -> Self {
        self.failures = Mutex::new(kinds.into_iter().collect());
        self
    }

    pub fn seeing(mut self, face: Option<FaceModel>) -> Self {
        self.face = face;
        self
    }
}

impl PerceptionBackend for ScriptedBackend {
    fn load(&self) -> Result<Box<dyn PerceptionEngine>, CaptureError> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failures.lock().unwrap().pop_front() {
            return Err(CaptureError::new(kind, "scripted load failure"));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            landmarks: self.face.map(|f| f.landmarks()),
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedEngine {
    landmarks: Option<LandmarkFrame>,
    counters: Arc<Counters>,
}

impl PerceptionEngine for ScriptedEngine {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<LandmarkFrame>, CaptureError> {
        Ok(self.landmarks.clone())
    }

    fn close(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps every delivered record.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    records: Mutex<Vec<MetricsRecord>>,
}

impl RecordingTransport {
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }
}

impl MetricsTransport for RecordingTransport {
    fn deliver<'a>(&'a self, record: &'a MetricsRecord) -> DeliveryFuture<'a> {
        Box::pin(async move {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        })
    }
}

/// Rejects every record.
#[derive(Debug, Default)]
pub struct FailingTransport;

impl MetricsTransport for FailingTransport {
    fn deliver<'a>(&'a self, _record: &'a MetricsRecord) -> DeliveryFuture<'a> {
        Box::pin(async move { Err(TransportError::Network("backend unreachable".to_string())) })
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
