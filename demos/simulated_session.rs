//! Demonstration of the Engagement Agent on a simulated subject.
//!
//! This example shows how to:
//! 1. Build an agent around the simulated camera and landmark model
//! 2. Watch engagement snapshots and interventions as they change
//! 3. Feed presentation-layer actions into the agent
//! 4. Collect the metrics records it emits
//!
//! Run with: cargo run --example simulated_session -- drowsy
//!
//! Scenarios: attentive, drowsy, distracted, absent

use std::sync::{Arc, Mutex};
use std::time::Duration;

use engagement_agent::{
    agent::{Agent, Command},
    capture::{Scenario, SimulatedCamera, SimulatedPerception},
    config::Config,
    core::{MetricsRecord, PlayerEvent, SystemClock, UserAction},
    transparency::TransparencyLog,
    transport::{DeliveryFuture, MetricsTransport},
    PRIVACY_DECLARATION,
};

const FPS: u32 = 30;
const RUN_SECS: u64 = 30;

/// Keeps records in memory so the demo can print them at the end.
#[derive(Default)]
struct CollectingTransport {
    records: Mutex<Vec<MetricsRecord>>,
}

impl MetricsTransport for CollectingTransport {
    fn deliver<'a>(&'a self, record: &'a MetricsRecord) -> DeliveryFuture<'a> {
        Box::pin(async move {
            if let Ok(mut records) = self.records.lock() {
                records.push(record.clone());
            }
            Ok(())
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_target(false)
        .init();

    println!("Engagement Agent - Simulated Session Demo");
    println!("=========================================");
    println!();

    // Display privacy declaration
    println!("{PRIVACY_DECLARATION}");
    println!();

    let scenario = std::env::args()
        .nth(1)
        .and_then(|s| Scenario::parse(&s))
        .unwrap_or(Scenario::Drowsy);

    let config = Config {
        metrics_interval: Duration::from_secs(5),
        ..Config::default()
    };

    let transport = Arc::new(CollectingTransport::default());
    let transparency_log = Arc::new(TransparencyLog::new());

    let (mut agent, handle) = match Agent::new(
        config,
        Arc::new(SimulatedCamera::new(FPS)),
        Arc::new(SimulatedPerception::new(scenario, FPS)),
        transport.clone(),
        Arc::new(SystemClock),
        transparency_log.clone(),
    ) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error building agent: {e}");
            return;
        }
    };
    agent.on_ready(|| println!("Camera ready ✓"));

    println!("Scenario: {scenario}");
    println!("Running for {RUN_SECS} seconds...");
    println!();

    let run = tokio::spawn(agent.run());

    // Show a snapshot every second and interventions as they arrive.
    let mut interventions = handle.subscribe_interventions();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut shown = 0;
    for second in 0..RUN_SECS {
        ticker.tick().await;

        let snapshot = handle.snapshot();
        println!(
            "  [{second:>2}s] face: {:<5} attention: {:.0}  fatigue: {:.2}  blinks: {:>3}  yawns: {}",
            snapshot.face_detected,
            snapshot.attention_score,
            snapshot.fatigue_score,
            snapshot.blink_count,
            snapshot.yawn_count
        );

        if interventions.has_changed().unwrap_or(false) {
            let live = interventions.borrow_and_update().clone();
            for intervention in live.iter().skip(shown) {
                println!(
                    "  >>> {} intervention: {}",
                    intervention.category, intervention.message
                );
            }
            shown = live.len();
        }

        // Pretend the student presses play a few seconds in.
        if second == 3 {
            let _ = handle
                .send(Command::Action(UserAction::Player {
                    event: PlayerEvent::Play,
                }))
                .await;
        }
    }

    // Stop the agent
    println!();
    println!("Stopping...");
    let _ = handle.send(Command::Shutdown).await;
    match run.await {
        Ok(Ok(summary)) => {
            println!("Open interventions at exit: {}", summary.live_interventions);
        }
        Ok(Err(e)) => eprintln!("Session failed: {e}"),
        Err(e) => eprintln!("Agent task failed: {e}"),
    }

    let records = transport
        .records
        .lock()
        .map(|r| r.clone())
        .unwrap_or_default();
    println!();
    println!("=== Emitted Records ({}) ===", records.len());
    if let Some(last) = records.last() {
        let json = serde_json::to_string_pretty(last).unwrap_or_default();
        println!("  Last record:");
        for line in json.lines() {
            println!("    {line}");
        }
    }

    println!();
    println!("{}", transparency_log.summary());
}
