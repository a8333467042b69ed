//! Engagement Agent - real-time attention and fatigue monitoring from facial landmarks.
//!
//! This library turns a stream of per-frame facial landmarks into low-frequency
//! engagement signals (attention, fatigue, blinks, yawns), throttled
//! notifications and periodic metrics records, while keeping the underlying
//! capture session alive across device failures.
//!
//! # Privacy Guarantees
//!
//! - **No images**: Frames never leave the capture workers
//! - **No landmarks**: Landmark coordinates are discarded after feature extraction
//! - **Derived only**: Only scores and counts reach records and transports
//! - **Transparency**: All processing is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Engagement Agent                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐             │
//! │  │   Session   │──▶│  Features   │──▶│ Blink/Yawn  │             │
//! │  │ (capture +  │   │ (EAR, gaze) │   │  Detector   │             │
//! │  │ perception) │   └─────────────┘   └──────┬──────┘             │
//! │  └─────────────┘                            ▼                    │
//! │         │          ┌─────────────┐   ┌─────────────┐             │
//! │         │          │Interventions│◀──│ Classifier  │             │
//! │         │          │ (cooldown)  │   │ (snapshot)  │             │
//! │         ▼          └─────────────┘   └──────┬──────┘             │
//! │  ┌─────────────┐                            ▼                    │
//! │  │Transparency │                     ┌─────────────┐             │
//! │  │    Log      │                     │   Records   │──▶ Transport│
//! │  └─────────────┘                     └─────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use engagement_agent::{
//!     agent::Agent, capture::{Scenario, SimulatedCamera, SimulatedPerception},
//!     config::Config, core::SystemClock, transparency, transport::LogTransport,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (agent, handle) = Agent::new(
//!     Config::default(),
//!     Arc::new(SimulatedCamera::new(30)),
//!     Arc::new(SimulatedPerception::new(Scenario::Drowsy, 30)),
//!     Arc::new(LogTransport),
//!     Arc::new(SystemClock),
//!     transparency::create_shared_log(),
//! )?;
//!
//! // The latest snapshot is available from the handle at any time.
//! let _ = handle.snapshot();
//! agent.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod capture;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod session;
pub mod transparency;
pub mod transport;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use agent::{Agent, AgentHandle, Command, RunSummary};
pub use capture::{CaptureDevice, CaptureError, CaptureErrorKind, PerceptionBackend};
pub use config::{Config, ConfigError};
pub use core::{EngagementSnapshot, Intervention, MetricsRecord, UserAction};
pub use pipeline::EngagementPipeline;
pub use session::{HealthStatus, SessionError, SessionManager, SessionState};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};
pub use transport::{JsonlTransport, LogTransport, MetricsTransport, TransportError};

// Gateway re-exports (when enabled)
#[cfg(feature = "gateway")]
pub use gateway::{GatewayConfig, GatewayError, GatewayTransport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║             ENGAGEMENT AGENT - PRIVACY DECLARATION               ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent estimates attention and fatigue during a lesson.     ║
║                                                                  ║
║  ✓ WHAT WE DERIVE:                                               ║
║    • Whether a face is in view and looking at the screen         ║
║    • How open the eyes and mouth are (ratios only)               ║
║    • Blink and yawn counts                                       ║
║    • Player, material and notes activity                         ║
║                                                                  ║
║  ✗ WHAT WE NEVER STORE OR SEND:                                  ║
║    • Camera images or video                                      ║
║    • Facial landmark coordinates                                 ║
║    • Anything that could identify your face                      ║
║                                                                  ║
║  Frames are processed in memory and discarded immediately.       ║
║  Only derived scores and counts leave the agent.                 ║
║                                                                  ║
║  You can view processing statistics anytime with:                ║
║    engagement-agent status                                       ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
