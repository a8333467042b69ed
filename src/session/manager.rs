//! Capture session lifecycle: acquisition with retry, health probing and reconnection.

use crate::capture::{
    CaptureDevice, CaptureError, CaptureErrorKind, FrameSource, PerceptionBackend,
    PerceptionEngine, PerceptionResult,
};
use crate::config::SessionConfig;
use crate::session::handle::SessionHandle;
use crate::transparency::SharedTransparencyLog;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Lifecycle state of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Reconnecting,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Which collaborator an acquisition step targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStage {
    FrameSource,
    Perception,
}

impl std::fmt::Display for AcquireStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquireStage::FrameSource => write!(f, "frame source"),
            AcquireStage::Perception => write!(f, "perception engine"),
        }
    }
}

/// Errors surfaced by the session manager.
#[derive(Debug)]
pub enum SessionError {
    /// A start sequence gave up on one of its steps
    Acquisition {
        stage: AcquireStage,
        attempts: u32,
        source: CaptureError,
    },
    /// The session was lost and could not be re-established
    ReconnectExhausted {
        rounds: u32,
        last: Option<Box<SessionError>>,
    },
}

impl SessionError {
    /// The classified capture failure behind this error.
    pub fn kind(&self) -> CaptureErrorKind {
        match self {
            SessionError::Acquisition { source, .. } => source.kind(),
            SessionError::ReconnectExhausted { last, .. } => last
                .as_ref()
                .map(|e| e.kind())
                .unwrap_or(CaptureErrorKind::Unknown),
        }
    }

    /// Advice a person can act on.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Acquisition {
                stage,
                attempts,
                source,
            } => write!(
                f,
                "Failed to acquire {stage} after {attempts} attempt(s): {source}. {}",
                source.kind().user_message()
            ),
            SessionError::ReconnectExhausted { rounds, last } => {
                write!(f, "Capture session lost; {rounds} reconnect round(s) failed")?;
                if let Some(last) = last {
                    write!(f, ". Last error: {last}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Acquisition { source, .. } => Some(source),
            SessionError::ReconnectExhausted { last, .. } => last
                .as_deref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
        }
    }
}

/// Outcome of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// The session failed its probe and was re-established
    Reconnected { rounds: u32 },
    /// No session is running
    Inactive,
}

/// Invoked once per successful `start`.
pub type ReadyCallback = Box<dyn FnMut() + Send>;

/// Supervises the frame source and perception engine.
pub struct SessionManager {
    config: SessionConfig,
    device: Arc<dyn CaptureDevice>,
    backend: Arc<dyn PerceptionBackend>,
    results: mpsc::Sender<PerceptionResult>,
    log: SharedTransparencyLog,
    /// Every transition is published here
    state: watch::Sender<SessionState>,
    handle: Option<SessionHandle>,
    on_ready: Option<ReadyCallback>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        device: Arc<dyn CaptureDevice>,
        backend: Arc<dyn PerceptionBackend>,
        results: mpsc::Sender<PerceptionResult>,
        log: SharedTransparencyLog,
    ) -> Self {
        Self {
            config,
            device,
            backend,
            results,
            log,
            state: watch::Sender::new(SessionState::Idle),
            handle: None,
            on_ready: None,
        }
    }

    /// Register the callback fired when a `start` succeeds.
    pub fn on_ready(&mut self, callback: impl FnMut() + Send + 'static) {
        self.on_ready = Some(Box::new(callback));
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state transitions, including those made while a reconnect is in flight.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    /// Acquire the frame source and the perception engine and start the workers.
    ///
    /// A no-op while a session is already starting, running or reconnecting.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if matches!(
            state,
            SessionState::Starting | SessionState::Running | SessionState::Reconnecting
        ) {
            info!(%state, "start ignored, session already active");
            return Ok(());
        }

        let guard = StateGuard::enter(&self.state, SessionState::Starting);
        info!("starting capture session");

        match acquire(
            &self.config,
            &self.device,
            &self.backend,
            &self.results,
            &self.log,
        )
        .await
        {
            Ok(handle) => {
                info!(source = handle.source_name(), "capture session running");
                self.handle = Some(handle);
                guard.finish(SessionState::Running);
                if let Some(callback) = self.on_ready.as_mut() {
                    callback();
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "capture session failed to start");
                guard.finish(SessionState::Stopped);
                Err(e)
            }
        }
    }

    /// Probe a running session and reconnect it if the probe fails.
    pub async fn health_check(&mut self) -> Result<HealthStatus, SessionError> {
        if self.state() != SessionState::Running {
            return Ok(HealthStatus::Inactive);
        }

        let probe = match &self.handle {
            Some(handle) => handle.probe(self.config.frame_stall_timeout),
            None => Err("no session handle".to_string()),
        };

        match probe {
            Ok(()) => {
                debug!("capture session healthy");
                Ok(HealthStatus::Healthy)
            }
            Err(reason) => {
                warn!(%reason, "capture session unhealthy, reconnecting");
                self.reconnect().await
            }
        }
    }

    async fn reconnect(&mut self) -> Result<HealthStatus, SessionError> {
        let guard = StateGuard::enter(&self.state, SessionState::Reconnecting);

        if let Some(handle) = self.handle.take() {
            release_off_loop(handle).await;
        }

        let rounds = self.config.reconnect_attempts.max(1);
        let mut last = None;
        for round in 1..=rounds {
            match acquire(
                &self.config,
                &self.device,
                &self.backend,
                &self.results,
                &self.log,
            )
            .await
            {
                Ok(handle) => {
                    info!(round, source = handle.source_name(), "capture session reconnected");
                    self.handle = Some(handle);
                    self.log.record_reconnect();
                    guard.finish(SessionState::Running);
                    return Ok(HealthStatus::Reconnected { rounds: round });
                }
                Err(e) => {
                    warn!(round, error = %e, "reconnect round failed");
                    last = Some(Box::new(e));
                    if round < rounds {
                        tokio::time::sleep(self.config.backoff_base * round).await;
                    }
                }
            }
        }

        guard.finish(SessionState::Stopped);
        let err = SessionError::ReconnectExhausted { rounds, last };
        error!(error = %err, "giving up on capture session");
        Err(err)
    }

    /// Stop the workers and release both collaborators. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
            info!("capture session stopped");
        }
        let previous = self.state.send_replace(SessionState::Stopped);
        if previous != SessionState::Stopped {
            debug!(from = %previous, "session state -> stopped");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("handle", &self.handle)
            .finish()
    }
}

/// Falls back to `Stopped` if the owning future is dropped mid-transition.
struct StateGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    armed: bool,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a watch::Sender<SessionState>, next: SessionState) -> Self {
        state.send_replace(next);
        Self { state, armed: true }
    }

    fn finish(mut self, next: SessionState) {
        self.state.send_replace(next);
        self.armed = false;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(SessionState::Stopped);
        }
    }
}

/// Closes an acquired frame source unless it is handed on.
struct SourceGuard(Option<Box<dyn FrameSource>>);

impl SourceGuard {
    fn into_inner(mut self) -> Option<Box<dyn FrameSource>> {
        self.0.take()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        if let Some(mut source) = self.0.take() {
            source.close();
        }
    }
}

/// Closes a loaded perception engine unless it is handed on.
struct EngineGuard(Option<Box<dyn PerceptionEngine>>);

impl EngineGuard {
    fn into_inner(mut self) -> Option<Box<dyn PerceptionEngine>> {
        self.0.take()
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        if let Some(mut engine) = self.0.take() {
            engine.close();
        }
    }
}

async fn acquire(
    config: &SessionConfig,
    device: &Arc<dyn CaptureDevice>,
    backend: &Arc<dyn PerceptionBackend>,
    results: &mpsc::Sender<PerceptionResult>,
    log: &SharedTransparencyLog,
) -> Result<SessionHandle, SessionError> {
    let source = with_retry(config, AcquireStage::FrameSource, || {
        let device = device.clone();
        run_blocking(config.acquire_timeout, move || {
            device.open().map(|s| SourceGuard(Some(s)))
        })
    })
    .await?;

    // An engine failure drops `source`, which closes it.
    let engine = with_retry(config, AcquireStage::Perception, || {
        let backend = backend.clone();
        run_blocking(config.acquire_timeout, move || {
            backend.load().map(|e| EngineGuard(Some(e)))
        })
    })
    .await?;

    match (source.into_inner(), engine.into_inner()) {
        (Some(source), Some(engine)) => Ok(SessionHandle::spawn(
            source,
            engine,
            results.clone(),
            log.clone(),
        )),
        _ => Err(SessionError::Acquisition {
            stage: AcquireStage::FrameSource,
            attempts: 1,
            source: CaptureError::new(CaptureErrorKind::Unknown, "acquired handle went missing"),
        }),
    }
}

/// Run `attempt` up to `max_attempts` times, sleeping `backoff_base * n` after failure n.
async fn with_retry<T, F, Fut>(
    config: &SessionConfig,
    stage: AcquireStage,
    mut attempt: F,
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CaptureError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut n = 1;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if n >= max_attempts => {
                return Err(SessionError::Acquisition {
                    stage,
                    attempts: n,
                    source: e,
                })
            }
            Err(e) => {
                let backoff = config.backoff_base * n;
                warn!(
                    %stage,
                    attempt = n,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "acquisition attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                n += 1;
            }
        }
    }
}

/// Run a blocking acquisition step on the blocking pool, bounded by `timeout`.
async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T, CaptureError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(CaptureError::new(
            CaptureErrorKind::Unknown,
            format!("acquisition task failed: {e}"),
        )),
        Err(_) => Err(CaptureError::timeout(format!(
            "no response within {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Joining the workers can take a frame interval; keep it off the event loop.
async fn release_off_loop(handle: SessionHandle) {
    if let Err(e) = tokio::task::spawn_blocking(move || handle.release()).await {
        warn!(error = %e, "releasing session handle failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Scenario, SimulatedCamera, SimulatedPerception};
    use crate::transparency::create_shared_log;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            backoff_base: Duration::from_millis(1),
            acquire_timeout: Duration::from_millis(500),
            ..SessionConfig::default()
        }
    }

    fn manager(camera: SimulatedCamera) -> (SessionManager, mpsc::Receiver<PerceptionResult>) {
        let (tx, rx) = mpsc::channel(1);
        let manager = SessionManager::new(
            fast_config(),
            Arc::new(camera),
            Arc::new(SimulatedPerception::new(Scenario::Attentive, 100)),
            tx,
            create_shared_log(),
        );
        (manager, rx)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (mut manager, mut rx) = manager(SimulatedCamera::new(100));
        assert_eq!(manager.state(), SessionState::Idle);

        manager.start().await.unwrap();
        assert_eq!(manager.state(), SessionState::Running);
        assert!(rx.recv().await.is_some());

        manager.stop();
        assert_eq!(manager.state(), SessionState::Stopped);
        manager.stop();
        assert_eq!(manager.state(), SessionState::Stopped);
        assert!(manager.handle().is_none());
    }

    #[tokio::test]
    async fn test_state_subscribers_follow_transitions() {
        let (mut manager, _rx) = manager(SimulatedCamera::new(100));
        let state = manager.subscribe_state();
        assert_eq!(*state.borrow(), SessionState::Idle);

        manager.start().await.unwrap();
        assert_eq!(*state.borrow(), SessionState::Running);

        drop(manager);
        assert_eq!(*state.borrow(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_from_idle() {
        let (mut manager, _rx) = manager(SimulatedCamera::new(100));
        manager.stop();
        assert_eq!(manager.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_unsupported_camera_fails_after_retries() {
        let camera = SimulatedCamera {
            width: 0,
            ..SimulatedCamera::new(30)
        };
        let (mut manager, _rx) = manager(camera);

        let err = manager.start().await.unwrap_err();
        assert_eq!(err.kind(), CaptureErrorKind::Unsupported);
        assert!(matches!(
            err,
            SessionError::Acquisition {
                stage: AcquireStage::FrameSource,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(manager.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_health_check_inactive_when_idle() {
        let (mut manager, _rx) = manager(SimulatedCamera::new(100));
        assert_eq!(manager.health_check().await.unwrap(), HealthStatus::Inactive);
    }

    #[test]
    fn test_error_message_is_actionable() {
        let err = SessionError::Acquisition {
            stage: AcquireStage::FrameSource,
            attempts: 3,
            source: CaptureError::new(CaptureErrorKind::PermissionDenied, "NotAllowedError"),
        };
        let text = err.to_string();
        assert!(text.contains("frame source"));
        assert!(text.contains("Allow camera access"));
    }
}
