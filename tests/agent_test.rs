//! End-to-end tests for the agent loop.

mod common;

use common::{
    eventually, fast_config, FailingTransport, RecordingTransport, ScriptedBackend,
    ScriptedDevice, StallMode,
};
use engagement_agent::agent::{Agent, Command};
use engagement_agent::capture::{CaptureErrorKind, FaceModel};
use engagement_agent::core::{Category, MetricsRecord, PlayerEvent, SystemClock, UserAction};
use engagement_agent::session::{SessionError, SessionState};
use engagement_agent::transparency::create_shared_log;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_records_are_delivered_on_cadence() {
    let transport = Arc::new(RecordingTransport::default());
    let (agent, handle) = Agent::new(
        fast_config(),
        Arc::new(ScriptedDevice::new()),
        Arc::new(ScriptedBackend::new()),
        transport.clone(),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();
    let run = tokio::spawn(agent.run());

    // Interaction records wait for the first full second.
    let delivered = {
        let transport = transport.clone();
        eventually(Duration::from_secs(4), move || {
            transport.count("attention") >= 2 && transport.count("interaction") >= 1
        })
        .await
    };
    assert!(delivered);

    handle.send(Command::Shutdown).await.unwrap();
    let summary = run.await.unwrap().unwrap();
    assert!(summary.final_snapshot.face_detected);
    assert!(summary.stats.records_emitted >= 3);
    assert_eq!(summary.stats.emissions_failed, 0);

    for record in transport.records() {
        if let MetricsRecord::Attention(attention) = record {
            assert!(attention.face_detected);
            assert_eq!(attention.attention_score, 1.0);
            assert!(!attention.privacy.contains_images);
            assert!(!attention.privacy.contains_landmarks);
        }
    }
}

#[tokio::test]
async fn test_commands_update_published_state() {
    let (agent, handle) = Agent::new(
        fast_config(),
        Arc::new(ScriptedDevice::new()),
        Arc::new(ScriptedBackend::new()),
        Arc::new(RecordingTransport::default()),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();
    let mut interventions = handle.subscribe_interventions();
    let run = tokio::spawn(agent.run());

    handle
        .send(Command::RequestIntervention {
            category: Category::Quiz,
            message: None,
        })
        .await
        .unwrap();
    let live = interventions
        .wait_for(|live| !live.is_empty())
        .await
        .unwrap()
        .clone();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].category, Category::Quiz);

    // A second request inside the cooldown is suppressed.
    handle
        .send(Command::RequestIntervention {
            category: Category::Quiz,
            message: Some("again".to_string()),
        })
        .await
        .unwrap();

    handle.send(Command::Dismiss(live[0].id)).await.unwrap();
    interventions
        .wait_for(|live| live.is_empty())
        .await
        .unwrap();

    handle
        .send(Command::Action(UserAction::Player {
            event: PlayerEvent::Play,
        }))
        .await
        .unwrap();
    handle.send(Command::ResetCounters).await.unwrap();
    handle.send(Command::Shutdown).await.unwrap();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.live_interventions, 0);
    assert_eq!(summary.stats.interventions, 1);
    assert_eq!(handle.session_state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_transport_failures_are_counted_and_dropped() {
    let (agent, handle) = Agent::new(
        fast_config(),
        Arc::new(ScriptedDevice::new()),
        Arc::new(ScriptedBackend::new()),
        Arc::new(FailingTransport),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();
    let log_handle = handle.clone();
    let run = tokio::spawn(agent.run());

    let mut snapshots = log_handle.subscribe_snapshot();
    snapshots
        .wait_for(|s| s.face_detected)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    handle.send(Command::Shutdown).await.unwrap();
    let summary = run.await.unwrap().unwrap();

    // The loop kept running and every failed record was accounted for.
    assert!(summary.stats.records_emitted > 0);
    assert!(summary.stats.emissions_failed > 0);
    assert!(summary.stats.emissions_failed <= summary.stats.records_emitted);
}

#[tokio::test]
async fn test_no_face_keeps_running_without_attention_records() {
    let transport = Arc::new(RecordingTransport::default());
    let (agent, handle) = Agent::new(
        fast_config(),
        Arc::new(ScriptedDevice::new()),
        Arc::new(ScriptedBackend::new().seeing(None)),
        transport.clone(),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();
    let run = tokio::spawn(agent.run());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!handle.snapshot().face_detected);
    assert_eq!(handle.snapshot().attention_score, 0.0);

    handle.send(Command::Shutdown).await.unwrap();
    let summary = run.await.unwrap().unwrap();
    assert!(summary.stats.no_face_frames > 0);
    assert_eq!(transport.count("attention"), 0);
}

#[tokio::test]
async fn test_drowsy_face_raises_fatigue_intervention() {
    let mut config = fast_config();
    config.interventions.fatigue_trigger = 0.6;
    let drowsy = FaceModel::default().with_ear(0.1).with_mouth_open(0.7);

    let (agent, handle) = Agent::new(
        config,
        Arc::new(ScriptedDevice::new()),
        Arc::new(ScriptedBackend::new().seeing(Some(drowsy))),
        Arc::new(RecordingTransport::default()),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();
    let mut interventions = handle.subscribe_interventions();
    let run = tokio::spawn(agent.run());

    let live = interventions
        .wait_for(|live| live.iter().any(|i| i.category == Category::Fatigue))
        .await
        .unwrap()
        .clone();
    assert_eq!(
        live.iter().filter(|i| i.category == Category::Fatigue).count(),
        1
    );

    handle.send(Command::Shutdown).await.unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_startup_failure_is_reported() {
    let (agent, handle) = Agent::new(
        fast_config(),
        Arc::new(ScriptedDevice::new().failing([CaptureErrorKind::DeviceNotFound; 3])),
        Arc::new(ScriptedBackend::new()),
        Arc::new(RecordingTransport::default()),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();

    let err = agent.run().await.unwrap_err();
    assert_eq!(err.kind(), CaptureErrorKind::DeviceNotFound);
    assert_eq!(handle.session_state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_lost_session_halts_agent() {
    let device = ScriptedDevice::new()
        .stalling_first_stream(3, StallMode::Error)
        .failing_after_first([CaptureErrorKind::DeviceBusy; 9]);
    let (agent, handle) = Agent::new(
        fast_config(),
        Arc::new(device),
        Arc::new(ScriptedBackend::new()),
        Arc::new(RecordingTransport::default()),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), agent.run())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(SessionError::ReconnectExhausted { .. })
    ));
    assert_eq!(handle.session_state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_loop_keeps_serving_while_reconnecting() {
    // The first stream dies after 20 frames; each of the 9 reopens is slow and fails.
    let device = ScriptedDevice::new()
        .stalling_first_stream(20, StallMode::Error)
        .failing_after_first([CaptureErrorKind::DeviceBusy; 9])
        .with_reopen_delay(Duration::from_millis(150));
    let transport = Arc::new(RecordingTransport::default());
    let (agent, handle) = Agent::new(
        fast_config(),
        Arc::new(device),
        Arc::new(ScriptedBackend::new()),
        transport.clone(),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();
    let mut state = handle.subscribe_session_state();
    let mut interventions = handle.subscribe_interventions();
    let run = tokio::spawn(agent.run());

    timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == SessionState::Reconnecting),
    )
    .await
    .expect("session never started reconnecting")
    .unwrap();
    let before = transport.records().len();

    handle
        .send(Command::RequestIntervention {
            category: Category::Quiz,
            message: None,
        })
        .await
        .unwrap();
    let applied = timeout(
        Duration::from_millis(500),
        interventions.wait_for(|live| !live.is_empty()),
    )
    .await
    .map(|live| live.is_ok())
    .unwrap_or(false);
    assert!(applied, "command not applied during reconnect");

    let emitted = {
        let transport = transport.clone();
        eventually(Duration::from_millis(500), move || {
            transport.records().len() > before
        })
        .await
    };
    assert!(emitted, "no records emitted during reconnect");
    assert_eq!(handle.session_state(), SessionState::Reconnecting);

    let result = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(SessionError::ReconnectExhausted { .. })
    ));
    assert_eq!(handle.session_state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_expired_interventions_leave_published_set() {
    let mut config = fast_config();
    // Keep the emission timer out of the way: frames alone must publish expiry.
    config.metrics_interval = Duration::from_secs(5);
    config.interventions.ttl = Some(Duration::from_millis(100));

    let (agent, handle) = Agent::new(
        config,
        Arc::new(ScriptedDevice::new()),
        Arc::new(ScriptedBackend::new()),
        Arc::new(RecordingTransport::default()),
        Arc::new(SystemClock),
        create_shared_log(),
    )
    .unwrap();
    let mut interventions = handle.subscribe_interventions();
    let run = tokio::spawn(agent.run());

    handle
        .send(Command::RequestIntervention {
            category: Category::Quiz,
            message: None,
        })
        .await
        .unwrap();
    interventions
        .wait_for(|live| !live.is_empty())
        .await
        .unwrap();

    let expired = timeout(
        Duration::from_secs(1),
        interventions.wait_for(|live| live.is_empty()),
    )
    .await
    .map(|live| live.is_ok())
    .unwrap_or(false);
    assert!(expired, "expired intervention still published");
    assert!(handle.interventions().is_empty());

    handle.send(Command::Shutdown).await.unwrap();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.live_interventions, 0);
}
