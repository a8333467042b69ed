//! Configuration for the engagement agent.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the options
//! it wants to override.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blink and yawn debouncing
    pub detector: DetectorConfig,

    /// Fatigue scoring rules
    pub fatigue: FatigueRules,

    /// Gaze region that counts as "on screen"
    pub gaze: GazeBounds,

    /// Intervention triggers and throttling
    pub interventions: InterventionConfig,

    /// Capture session acquisition and supervision
    pub session: SessionConfig,

    /// How often metrics records are emitted
    #[serde(with = "duration_ms", rename = "metrics_interval_ms")]
    pub metrics_interval: Duration,

    /// Subject identifier attached to metrics records
    pub student_id: u64,

    /// Lesson identifier attached to metrics records
    pub lesson_id: u64,

    /// IANA timezone used for record timestamps
    pub timezone: String,

    /// Path for exported metrics records
    pub export_path: PathBuf,

    /// Path for storing state and transparency logs
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("engagement-agent");

        Self {
            detector: DetectorConfig::default(),
            fatigue: FatigueRules::default(),
            gaze: GazeBounds::default(),
            interventions: InterventionConfig::default(),
            session: SessionConfig::default(),
            metrics_interval: Duration::from_secs(2),
            student_id: 1,
            lesson_id: 1,
            timezone: "UTC".to_string(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("engagement-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| ConfigError::Invalid(format!("timezone '{}': {e}", self.timezone)))
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        require(d.blink_ear_threshold > 0.0, "detector.blink_ear_threshold must be positive")?;
        require(d.yawn_ratio_threshold > 0.0, "detector.yawn_ratio_threshold must be positive")?;

        let f = &self.fatigue;
        require(
            f.eyes_closed_below <= f.eyes_heavy_below,
            "fatigue.eyes_closed_below must not exceed fatigue.eyes_heavy_below",
        )?;
        require(
            f.mouth_open_above <= f.yawn_above,
            "fatigue.mouth_open_above must not exceed fatigue.yawn_above",
        )?;
        require(
            [
                f.eyes_closed_weight,
                f.eyes_heavy_weight,
                f.yawn_weight,
                f.mouth_open_weight,
                f.blink_count_weight,
            ]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0),
            "fatigue weights must be non-negative",
        )?;

        require(
            self.gaze.max_abs_x > 0.0 && self.gaze.max_abs_y > 0.0,
            "gaze bounds must be positive",
        )?;

        let i = &self.interventions;
        require(
            (0.0..=1.0).contains(&i.fatigue_trigger),
            "interventions.fatigue_trigger must be within [0, 1]",
        )?;

        let s = &self.session;
        require(s.max_attempts >= 1, "session.max_attempts must be at least 1")?;
        require(s.reconnect_attempts >= 1, "session.reconnect_attempts must be at least 1")?;
        require(
            !s.health_check_interval.is_zero(),
            "session.health_check_interval_ms must be positive",
        )?;
        require(!s.acquire_timeout.is_zero(), "session.acquire_timeout_ms must be positive")?;
        require(!self.metrics_interval.is_zero(), "metrics_interval_ms must be positive")?;

        self.tz()?;
        Ok(())
    }
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message.to_string()))
    }
}

/// Blink and yawn detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// EAR below which the eyes count as closed
    pub blink_ear_threshold: f64,
    /// Minimum time between two counted blinks
    #[serde(with = "duration_ms", rename = "blink_refractory_ms")]
    pub blink_refractory: Duration,
    /// Mouth opening above which a yawn is counted
    pub yawn_ratio_threshold: f64,
    /// Minimum time between two counted yawns
    #[serde(with = "duration_ms", rename = "yawn_refractory_ms")]
    pub yawn_refractory: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            blink_ear_threshold: 0.20,
            blink_refractory: Duration::from_millis(300),
            yawn_ratio_threshold: 0.60,
            yawn_refractory: Duration::from_millis(2000),
        }
    }
}

/// Thresholds and weights of the additive fatigue score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FatigueRules {
    pub eyes_closed_below: f64,
    pub eyes_closed_weight: f64,
    /// Only applies when the eyes-closed rule does not
    pub eyes_heavy_below: f64,
    pub eyes_heavy_weight: f64,
    pub yawn_above: f64,
    pub yawn_weight: f64,
    /// Only applies when the yawn rule does not
    pub mouth_open_above: f64,
    pub mouth_open_weight: f64,
    /// Session-cumulative blink count above which the penalty applies
    pub blink_count_above: u32,
    pub blink_count_weight: f64,
}

impl Default for FatigueRules {
    fn default() -> Self {
        Self {
            eyes_closed_below: 0.20,
            eyes_closed_weight: 0.4,
            eyes_heavy_below: 0.25,
            eyes_heavy_weight: 0.2,
            yawn_above: 0.60,
            yawn_weight: 0.3,
            mouth_open_above: 0.40,
            mouth_open_weight: 0.1,
            blink_count_above: 20,
            blink_count_weight: 0.3,
        }
    }
}

/// Open interval around the center that counts as looking at the screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeBounds {
    pub max_abs_x: f64,
    pub max_abs_y: f64,
}

impl Default for GazeBounds {
    fn default() -> Self {
        Self {
            max_abs_x: 0.3,
            max_abs_y: 0.2,
        }
    }
}

/// Intervention trigger and throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionConfig {
    /// Minimum time between two interventions of the same category
    #[serde(with = "duration_ms", rename = "cooldown_ms")]
    pub cooldown: Duration,
    /// Drop interventions nobody dismissed after this long
    #[serde(with = "option_duration_ms", rename = "ttl_ms")]
    pub ttl: Option<Duration>,
    /// Fatigue score above which a fatigue intervention fires
    pub fatigue_trigger: f64,
    /// Session age after which low interaction is flagged
    pub idle_after_secs: u64,
    /// Interactions needed to avoid the low-interaction intervention
    pub min_interactions: u64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            ttl: None,
            fatigue_trigger: 0.7,
            idle_after_secs: 120,
            min_interactions: 2,
        }
    }
}

/// Capture session supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Attempts per acquisition step
    pub max_attempts: u32,
    /// Backoff unit; attempt n waits n times this
    #[serde(with = "duration_ms", rename = "backoff_base_ms")]
    pub backoff_base: Duration,
    /// Upper bound on a single acquisition attempt
    #[serde(with = "duration_ms", rename = "acquire_timeout_ms")]
    pub acquire_timeout: Duration,
    /// Full restart rounds before the session is declared lost
    pub reconnect_attempts: u32,
    #[serde(with = "duration_ms", rename = "health_check_interval_ms")]
    pub health_check_interval: Duration,
    /// A source silent for longer than this is considered dead
    #[serde(with = "duration_ms", rename = "frame_stall_timeout_ms")]
    pub frame_stall_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(5),
            reconnect_attempts: 3,
            health_check_interval: Duration::from_secs(5),
            frame_stall_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}
