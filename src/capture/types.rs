//! Frame, landmark and error types exchanged with the capture and perception collaborators.
//!
//! Frames never leave the session workers. Only landmark geometry reaches the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single image frame from the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number within the session
    pub sequence: u64,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Raw pixel data (format is the source's business)
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            width,
            height,
            data,
        }
    }
}

/// A normalized facial landmark. `z` is zero for 2-D models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Planar distance to another landmark.
    pub fn distance(&self, other: &Landmark) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Landmarks for one detected face, indexed by face-mesh landmark number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub points: Vec<Landmark>,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Look up a landmark by index, rejecting missing or non-finite points.
    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index).filter(|p| p.is_finite())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Outcome of running the perception engine on one frame.
#[derive(Debug, Clone)]
pub struct PerceptionResult {
    pub frame_sequence: u64,
    pub captured_at: DateTime<Utc>,
    /// `None` when no face was found
    pub landmarks: Option<LandmarkFrame>,
}

impl PerceptionResult {
    pub fn face(frame_sequence: u64, landmarks: LandmarkFrame) -> Self {
        Self {
            frame_sequence,
            captured_at: Utc::now(),
            landmarks: Some(landmarks),
        }
    }

    pub fn no_face(frame_sequence: u64) -> Self {
        Self {
            frame_sequence,
            captured_at: Utc::now(),
            landmarks: None,
        }
    }
}

/// Closed classification of device and perception failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureErrorKind {
    PermissionDenied,
    DeviceNotFound,
    /// Device in use by another application or unreadable
    DeviceBusy,
    Unsupported,
    Timeout,
    Unknown,
}

impl CaptureErrorKind {
    /// Advice a person can act on.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureErrorKind::PermissionDenied => {
                "Camera permission denied. Allow camera access and restart the session."
            }
            CaptureErrorKind::DeviceNotFound => {
                "No camera found. Connect a camera and restart the session."
            }
            CaptureErrorKind::DeviceBusy => {
                "The camera may be in use by another application. Close it and try again."
            }
            CaptureErrorKind::Unsupported => {
                "The camera does not support the required format. Try another camera."
            }
            CaptureErrorKind::Timeout => "Timed out while accessing the camera. Try again.",
            CaptureErrorKind::Unknown => "Unknown error while accessing the camera.",
        }
    }
}

impl std::fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureErrorKind::PermissionDenied => "permission denied",
            CaptureErrorKind::DeviceNotFound => "device not found",
            CaptureErrorKind::DeviceBusy => "device busy",
            CaptureErrorKind::Unsupported => "unsupported",
            CaptureErrorKind::Timeout => "timeout",
            CaptureErrorKind::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Error reported by a capture device, frame source or perception engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureError {
    kind: CaptureErrorKind,
    message: String,
}

impl CaptureError {
    pub fn new(kind: CaptureErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CaptureErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> CaptureErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for CaptureError {}
