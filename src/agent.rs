//! The agent event loop.
//!
//! One task drives everything: perception results, the health-check timer, the
//! metrics timer and inbound commands are multiplexed with `tokio::select!`.
//! A health check that turns into a reconnect can take many seconds, so it is
//! polled as its own branch and the other branches keep being served.
//! State leaves the loop through `watch` channels, which only ever hold the
//! latest value.

use crate::capture::{CaptureDevice, PerceptionBackend, PerceptionResult};
use crate::config::{Config, ConfigError};
use crate::core::{
    Category, Clock, EngagementSnapshot, Intervention, MetricsRecord, RecordBuilder, UserAction,
};
use crate::pipeline::EngagementPipeline;
use crate::session::{HealthStatus, SessionError, SessionManager, SessionState};
use crate::transparency::{SharedTransparencyLog, TransparencyStats};
use crate::transport::MetricsTransport;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the inbound command queue.
const COMMAND_QUEUE: usize = 64;

/// A health check in flight. It owns the session until it completes.
type HealthCheck =
    Pin<Box<dyn Future<Output = (SessionManager, Result<HealthStatus, SessionError>)> + Send>>;

/// Inbound requests for the agent loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Action(UserAction),
    Dismiss(Uuid),
    RequestIntervention {
        category: Category,
        message: Option<String>,
    },
    ResetCounters,
    Shutdown,
}

/// The agent loop is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentGone;

impl std::fmt::Display for AgentGone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Agent is no longer running")
    }
}

impl std::error::Error for AgentGone {}

/// Cloneable access to a running agent.
///
/// The agent shuts down once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<EngagementSnapshot>,
    interventions: watch::Receiver<Vec<Intervention>>,
    session_state: watch::Receiver<SessionState>,
}

impl AgentHandle {
    pub async fn send(&self, command: Command) -> Result<(), AgentGone> {
        self.commands.send(command).await.map_err(|_| AgentGone)
    }

    /// Queue a shutdown without waiting. Usable from non-async contexts.
    pub fn request_shutdown(&self) -> bool {
        self.commands.try_send(Command::Shutdown).is_ok()
    }

    pub fn snapshot(&self) -> EngagementSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn interventions(&self) -> Vec<Intervention> {
        self.interventions.borrow().clone()
    }

    pub fn session_state(&self) -> SessionState {
        *self.session_state.borrow()
    }

    /// Receiver updated on every processed frame.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<EngagementSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_interventions(&self) -> watch::Receiver<Vec<Intervention>> {
        self.interventions.clone()
    }

    pub fn subscribe_session_state(&self) -> watch::Receiver<SessionState> {
        self.session_state.clone()
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: TransparencyStats,
    pub final_snapshot: EngagementSnapshot,
    pub live_interventions: usize,
}

/// Owns the session, the pipeline and the loop that connects them.
pub struct Agent {
    config: Config,
    /// `None` while a health check has it
    session: Option<SessionManager>,
    results: mpsc::Receiver<PerceptionResult>,
    commands: mpsc::Receiver<Command>,
    pipeline: EngagementPipeline,
    transport: Arc<dyn MetricsTransport>,
    clock: Arc<dyn Clock>,
    log: SharedTransparencyLog,
    snapshot_tx: watch::Sender<EngagementSnapshot>,
    interventions_tx: watch::Sender<Vec<Intervention>>,
}

impl Agent {
    pub fn new(
        config: Config,
        device: Arc<dyn CaptureDevice>,
        backend: Arc<dyn PerceptionBackend>,
        transport: Arc<dyn MetricsTransport>,
        clock: Arc<dyn Clock>,
        log: SharedTransparencyLog,
    ) -> Result<(Self, AgentHandle), ConfigError> {
        config.validate()?;

        let (results_tx, results) = mpsc::channel(1);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngagementSnapshot::default());
        let (interventions_tx, interventions_rx) = watch::channel(Vec::new());

        let session = SessionManager::new(
            config.session.clone(),
            device,
            backend,
            results_tx,
            log.clone(),
        );
        let state_rx = session.subscribe_state();
        let pipeline = EngagementPipeline::new(
            &config,
            RecordBuilder::from_config(&config)?,
            log.clone(),
            clock.now(),
        );

        let agent = Self {
            config,
            session: Some(session),
            results,
            commands,
            pipeline,
            transport,
            clock,
            log,
            snapshot_tx,
            interventions_tx,
        };
        let handle = AgentHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            interventions: interventions_rx,
            session_state: state_rx,
        };
        Ok((agent, handle))
    }

    /// Register a callback fired once the capture session is up.
    pub fn on_ready(&mut self, callback: impl FnMut() + Send + 'static) {
        if let Some(session) = self.session.as_mut() {
            session.on_ready(callback);
        }
    }

    /// Start the session and run until shutdown or fatal session loss.
    pub async fn run(mut self) -> Result<RunSummary, SessionError> {
        if let Some(session) = self.session.as_mut() {
            session.start().await?;
        }

        let mut health = ticker(self.config.session.health_check_interval);
        let mut emission = ticker(self.config.metrics_interval);
        let mut check: Option<HealthCheck> = None;

        loop {
            tokio::select! {
                Some(result) = self.results.recv() => self.on_perception(result),
                _ = health.tick(), if check.is_none() => {
                    if let Some(mut session) = self.session.take() {
                        check = Some(Box::pin(async move {
                            let checked = session.health_check().await;
                            (session, checked)
                        }));
                    }
                }
                (session, checked) = in_flight(&mut check) => {
                    check = None;
                    self.session = Some(session);
                    match checked {
                        Ok(HealthStatus::Reconnected { rounds }) => {
                            info!(rounds, "capture session restored");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "capture session lost, agent halting");
                            self.finish();
                            return Err(e);
                        }
                    }
                }
                _ = emission.tick() => self.emit(),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        info!("shutdown requested");
                        break;
                    }
                    Some(command) => self.apply(command),
                },
            }
        }

        // Dropping an unfinished check drops its session, which releases the device.
        drop(check);
        self.finish();
        Ok(RunSummary {
            stats: self.log.stats(),
            final_snapshot: self.pipeline.snapshot().clone(),
            live_interventions: self.pipeline.interventions().len(),
        })
    }

    fn on_perception(&mut self, result: PerceptionResult) {
        let outcome = self.pipeline.on_perception(&result, self.clock.now());
        let changed = outcome.interventions_changed();
        self.snapshot_tx.send_replace(outcome.snapshot);
        if changed {
            self.publish_interventions();
        }
    }

    fn apply(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::Action(action) => self.pipeline.on_action(&action, now),
            Command::Dismiss(id) => {
                if self.pipeline.dismiss(id) {
                    self.publish_interventions();
                }
            }
            Command::RequestIntervention { category, message } => {
                if self
                    .pipeline
                    .request_intervention(category, message, now)
                    .is_some()
                {
                    self.publish_interventions();
                }
            }
            Command::ResetCounters => {
                self.pipeline.reset_counters();
                self.snapshot_tx.send_replace(self.pipeline.snapshot().clone());
            }
            Command::Shutdown => {}
        }
    }

    fn emit(&mut self) {
        let now = self.clock.now();
        if self.pipeline.expire(now) > 0 {
            self.publish_interventions();
        }

        let records = self.pipeline.emission(now).into_records();
        if records.is_empty() {
            debug!("nothing to emit yet");
            return;
        }

        self.log.record_emitted(records.len() as u64);
        for record in records {
            self.deliver(record);
        }
    }

    fn deliver(&self, record: MetricsRecord) {
        let transport = self.transport.clone();
        let log = self.log.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.deliver(&record).await {
                warn!(kind = record.kind(), error = %e, "metrics delivery failed, dropping record");
                log.record_emission_failed();
            }
        });
    }

    fn publish_interventions(&self) {
        self.interventions_tx
            .send_replace(self.pipeline.interventions().to_vec());
    }

    fn finish(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
        if let Err(e) = self.log.save() {
            warn!(error = %e, "could not persist transparency stats");
        }
    }
}

/// Wait for the in-flight health check, or forever if there is none.
async fn in_flight(
    check: &mut Option<HealthCheck>,
) -> (SessionManager, Result<HealthStatus, SessionError>) {
    match check.as_mut() {
        Some(check) => check.await,
        None => std::future::pending().await,
    }
}

/// Interval whose first tick is one period from now.
fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Scenario, SimulatedCamera, SimulatedPerception};
    use crate::core::SystemClock;
    use crate::transparency::create_shared_log;
    use crate::transport::LogTransport;

    fn agent(config: Config) -> (Agent, AgentHandle) {
        Agent::new(
            config,
            Arc::new(SimulatedCamera::new(100)),
            Arc::new(SimulatedPerception::new(Scenario::Attentive, 100)),
            Arc::new(LogTransport),
            Arc::new(SystemClock),
            create_shared_log(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.timezone = "Nowhere/Special".to_string();
        let result = Agent::new(
            config,
            Arc::new(SimulatedCamera::new(30)),
            Arc::new(SimulatedPerception::new(Scenario::Attentive, 30)),
            Arc::new(LogTransport),
            Arc::new(SystemClock),
            create_shared_log(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_session() {
        let (agent, handle) = agent(Config::default());
        let mut state = handle.subscribe_session_state();
        let run = tokio::spawn(agent.run());

        state
            .wait_for(|s| *s == SessionState::Running)
            .await
            .unwrap();
        handle.send(Command::Shutdown).await.unwrap();

        let summary = run.await.unwrap().unwrap();
        assert_eq!(handle.session_state(), SessionState::Stopped);
        assert_eq!(summary.live_interventions, 0);
    }

    #[tokio::test]
    async fn test_dropping_every_handle_stops_agent() {
        let (agent, handle) = agent(Config::default());
        let run = tokio::spawn(agent.run());
        drop(handle);
        assert!(run.await.unwrap().is_ok());
    }
}
