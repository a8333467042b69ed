//! Engagement Agent CLI
//!
//! Runs the engagement pipeline against the simulated camera and landmark model.

use clap::{Parser, Subcommand};
use engagement_agent::{
    agent::{Agent, AgentHandle},
    capture::{Scenario, SimulatedCamera, SimulatedPerception},
    config::Config,
    core::SystemClock,
    transparency::create_shared_log_with_persistence,
    transport::{JsonlTransport, LogTransport, MetricsTransport},
    PRIVACY_DECLARATION, VERSION,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway")]
use engagement_agent::{GatewayConfig, GatewayTransport};

#[derive(Parser)]
#[command(name = "engagement-agent")]
#[command(author = "Engagement Agent")]
#[command(version = VERSION)]
#[command(about = "Real-time attention and fatigue monitoring from facial landmarks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring
    Start(StartArgs),

    /// Show cumulative processing statistics
    Status,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

#[derive(clap::Args)]
struct StartArgs {
    /// Simulated behaviour (attentive, drowsy, distracted, absent)
    #[arg(long, default_value = "attentive")]
    scenario: String,

    /// Simulated camera frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Make every camera stream fail after this many frames
    #[arg(long)]
    stall_after: Option<u64>,

    /// Stop automatically after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Override the metrics emission interval (milliseconds)
    #[arg(long)]
    metrics_interval_ms: Option<u64>,

    /// Override the intervention cooldown (milliseconds)
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Append metrics records as JSON Lines under the export directory
    #[arg(long)]
    export: bool,

    /// Explicit JSON Lines output file (implies --export)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Post metrics records to this backend (requires gateway feature)
    #[arg(long)]
    gateway_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long)]
    gateway_token: Option<String>,

    /// Serve the HTTP API on this port (requires server feature)
    #[arg(long)]
    serve: Option<u16>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            cmd_start(args);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Privacy => {
            cmd_privacy();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn cmd_start(args: StartArgs) {
    println!("Engagement Agent v{VERSION}");
    println!();

    let Some(scenario) = Scenario::parse(&args.scenario) else {
        eprintln!("Error: Unknown scenario '{}'", args.scenario);
        eprintln!("Expected one of: attentive, drowsy, distracted, absent");
        std::process::exit(1);
    };

    // Load or create configuration
    let mut config = Config::load().unwrap_or_default();
    if let Some(ms) = args.metrics_interval_ms {
        config.metrics_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = args.cooldown_ms {
        config.interventions.cooldown = Duration::from_millis(ms);
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting monitoring...");
    println!("  Scenario: {scenario}");
    println!("  Camera: simulated, {} fps", args.fps);
    if let Some(frames) = args.stall_after {
        println!("  Camera stalls after: {frames} frames");
    }
    println!(
        "  Metrics interval: {}ms",
        config.metrics_interval.as_millis()
    );
    println!(
        "  Intervention cooldown: {}s",
        config.interventions.cooldown.as_secs()
    );
    println!(
        "  Student {} / lesson {} ({})",
        config.student_id, config.lesson_id, config.timezone
    );

    let transport = match create_transport(&args, &config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    // Set up transparency log
    let transparency_log =
        create_shared_log_with_persistence(config.data_path.join("transparency.json"));

    let mut camera = SimulatedCamera::new(args.fps);
    if let Some(frames) = args.stall_after {
        camera = camera.with_stall_after(frames);
    }

    let (mut agent, handle) = match Agent::new(
        config,
        Arc::new(camera),
        Arc::new(SimulatedPerception::new(scenario, args.fps)),
        transport,
        Arc::new(SystemClock),
        transparency_log.clone(),
    ) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    agent.on_ready(|| println!("Camera ready."));

    ctrlc_handler(handle.clone());

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };

    let serve = args.serve;
    let duration = args.duration;
    let outcome = runtime.block_on(async move {
        let server_shutdown = start_server(serve, &handle).await;

        if let Some(secs) = duration {
            let timer = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                timer.request_shutdown();
            });
        }
        tokio::spawn(print_interventions(handle.clone()));
        drop(handle);

        let outcome = agent.run().await;
        if let Some(tx) = server_shutdown {
            let _ = tx.send(());
        }
        outcome
    });

    println!();
    match outcome {
        Ok(summary) => {
            let snapshot = summary.final_snapshot;
            println!("Stopped monitoring.");
            println!(
                "  Last snapshot: attention {:.0}, fatigue {:.2}, {} blinks, {} yawns",
                snapshot.attention_score,
                snapshot.fatigue_score,
                snapshot.blink_count,
                snapshot.yawn_count
            );
            println!("  Open interventions: {}", summary.live_interventions);
        }
        Err(e) => {
            eprintln!("Monitoring stopped: {e}");
            println!();
            println!("{}", transparency_log.summary());
            std::process::exit(1);
        }
    }

    // Final stats
    println!();
    println!("{}", transparency_log.summary());
}

/// Pick where metrics records go: backend, JSON Lines file, or the log.
fn create_transport(args: &StartArgs, config: &Config) -> Result<Arc<dyn MetricsTransport>, String> {
    if let Some(url) = &args.gateway_url {
        #[cfg(feature = "gateway")]
        {
            let transport =
                GatewayTransport::new(GatewayConfig::new(url.clone(), args.gateway_token.clone()))
                    .map_err(|e| e.to_string())?;
            println!("  Metrics: gateway {url}");
            println!("  Device ID: {}", transport.device_id());
            return Ok(Arc::new(transport));
        }
        #[cfg(not(feature = "gateway"))]
        eprintln!(
            "Warning: --gateway-url {url} ignored (gateway feature not enabled at compile time)"
        );
    }

    if let Some(path) = &args.output {
        println!("  Metrics: {}", path.display());
        return Ok(Arc::new(JsonlTransport::new(path.clone())));
    }
    if args.export {
        let transport = JsonlTransport::in_directory(&config.export_path);
        println!("  Metrics: {}", transport.path().display());
        return Ok(Arc::new(transport));
    }

    println!("  Metrics: log only");
    Ok(Arc::new(LogTransport))
}

#[cfg(feature = "server")]
async fn start_server(
    port: Option<u16>,
    handle: &AgentHandle,
) -> Option<tokio::sync::oneshot::Sender<()>> {
    use engagement_agent::server::{run, ServerConfig};

    let port = port?;
    match run(ServerConfig::new(port), handle.clone()).await {
        Ok((addr, shutdown)) => {
            println!("HTTP API: http://{addr}");
            Some(shutdown)
        }
        Err(e) => {
            eprintln!("Warning: Could not start HTTP API: {e}");
            None
        }
    }
}

#[cfg(not(feature = "server"))]
async fn start_server(
    port: Option<u16>,
    _handle: &AgentHandle,
) -> Option<tokio::sync::oneshot::Sender<()>> {
    if port.is_some() {
        eprintln!("Warning: --serve ignored (server feature not enabled at compile time)");
    }
    None
}

/// Print each intervention once, when it first appears.
async fn print_interventions(handle: AgentHandle) {
    let mut updates = handle.subscribe_interventions();
    drop(handle);

    let mut seen = HashSet::new();
    while updates.changed().await.is_ok() {
        let live = updates.borrow_and_update().clone();
        for intervention in live {
            if seen.insert(intervention.id) {
                println!(
                    "[{}] {}: {}",
                    intervention.created_at.format("%H:%M:%S"),
                    intervention.category,
                    intervention.message
                );
            }
        }
    }
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Engagement Agent Status");
    println!("=======================");
    println!();

    println!("Configuration:");
    println!("  Student: {}", config.student_id);
    println!("  Lesson: {}", config.lesson_id);
    println!("  Timezone: {}", config.timezone);
    println!(
        "  Metrics interval: {}ms",
        config.metrics_interval.as_millis()
    );
    println!(
        "  Intervention cooldown: {}s",
        config.interventions.cooldown.as_secs()
    );
    println!();

    // Load and show transparency stats if available
    let stats_path = config.data_path.join("transparency.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                for (key, label) in [
                    ("frames_processed", "Frames processed"),
                    ("no_face_frames", "Frames without a face"),
                    ("blinks", "Blinks"),
                    ("yawns", "Yawns"),
                    ("interventions", "Interventions"),
                    ("records_emitted", "Records emitted"),
                    ("reconnects", "Reconnects"),
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {label}: {value}");
                    }
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(handle: AgentHandle) {
    if let Err(e) = ctrlc::set_handler(move || {
        handle.request_shutdown();
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
