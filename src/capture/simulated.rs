//! Simulated camera and perception engine.
//!
//! Lets the agent run end to end without a webcam or a landmark model. The
//! perception side follows a scripted scenario so the pipeline sees realistic
//! blinks, yawns, glances away and absences.

use crate::capture::types::{CaptureError, CaptureErrorKind, Frame, Landmark, LandmarkFrame};
use crate::capture::{CaptureDevice, FrameSource, PerceptionBackend, PerceptionEngine};
use crate::core::features::{
    LEFT_EYE, LEFT_EYE_CENTER, MOUTH_BOTTOM, MOUTH_TOP, NOSE_TIP, RIGHT_EYE, RIGHT_EYE_CENTER,
};
use std::thread;
use std::time::{Duration, Instant};

/// Number of points in a face-mesh landmark set.
pub const FACE_MESH_POINTS: usize = 468;

const EYE_WIDTH: f64 = 0.08;
const EYE_LINE_Y: f64 = 0.42;
const LEFT_EYE_X: f64 = 0.40;
const RIGHT_EYE_X: f64 = 0.60;
const MOUTH_Y: f64 = 0.62;

/// Parametric face used to synthesize landmark sets with known features.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceModel {
    pub eye_aspect_ratio: f64,
    pub mouth_open: f64,
    pub gaze_x: f64,
    pub gaze_y: f64,
}

impl Default for FaceModel {
    fn default() -> Self {
        Self {
            eye_aspect_ratio: 0.3,
            mouth_open: 0.03,
            gaze_x: 0.0,
            gaze_y: 0.0,
        }
    }
}

impl FaceModel {
    pub fn with_ear(mut self, ear: f64) -> Self {
        self.eye_aspect_ratio = ear;
        self
    }

    pub fn with_mouth_open(mut self, mouth_open: f64) -> Self {
        self.mouth_open = mouth_open;
        self
    }

    pub fn with_gaze(mut self, x: f64, y: f64) -> Self {
        self.gaze_x = x;
        self.gaze_y = y;
        self
    }

    /// Build a full landmark set whose extracted features match this model.
    pub fn landmarks(&self) -> LandmarkFrame {
        let mut points = vec![Landmark::new(0.5, 0.5); FACE_MESH_POINTS];

        place_eye(&mut points, &LEFT_EYE, LEFT_EYE_X, self.eye_aspect_ratio);
        place_eye(&mut points, &RIGHT_EYE, RIGHT_EYE_X, self.eye_aspect_ratio);

        let left = points[LEFT_EYE_CENTER];
        let right = points[RIGHT_EYE_CENTER];
        let mid_x = (left.x + right.x) / 2.0;
        let mid_y = (left.y + right.y) / 2.0;
        points[NOSE_TIP] = Landmark::new(mid_x - self.gaze_x, mid_y + self.gaze_y);

        points[MOUTH_TOP] = Landmark::new(0.5, MOUTH_Y);
        points[MOUTH_BOTTOM] = Landmark::new(0.5, MOUTH_Y + self.mouth_open);

        LandmarkFrame::new(points)
    }
}

/// Lay out a six-point eye so that its aspect ratio equals `ear`.
fn place_eye(points: &mut [Landmark], layout: &[usize; 6], center_x: f64, ear: f64) {
    let w = EYE_WIDTH;
    let h = ear * w;
    let cy = EYE_LINE_Y;
    let positions = [
        (center_x - w / 2.0, cy),
        (center_x - w / 6.0, cy - h / 2.0),
        (center_x + w / 6.0, cy - h / 2.0),
        (center_x + w / 2.0, cy),
        (center_x + w / 6.0, cy + h / 2.0),
        (center_x - w / 6.0, cy + h / 2.0),
    ];
    for (&index, (x, y)) in layout.iter().zip(positions) {
        points[index] = Landmark::new(x, y);
    }
}

/// Behavior script for the simulated subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Looks at the screen, blinks every few seconds
    Attentive,
    /// Heavy eyelids, frequent blinks, periodic yawns
    Drowsy,
    /// Regularly looks away from the screen
    Distracted,
    /// Leaves the camera's field of view for stretches
    Absent,
}

impl Scenario {
    /// Parse a scenario name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "attentive" => Some(Scenario::Attentive),
            "drowsy" => Some(Scenario::Drowsy),
            "distracted" => Some(Scenario::Distracted),
            "absent" => Some(Scenario::Absent),
            _ => None,
        }
    }

    /// The face seen at `t` seconds into the stream, or `None` when nobody is there.
    pub fn face_at(&self, t: f64) -> Option<FaceModel> {
        let face = FaceModel::default().with_gaze(0.05 * t.sin(), 0.05);
        match self {
            Scenario::Attentive => {
                let ear = if t % 4.0 < 0.15 { 0.12 } else { 0.31 };
                Some(face.with_ear(ear))
            }
            Scenario::Drowsy => {
                let ear = if t % 2.0 < 0.3 { 0.1 } else { 0.23 };
                let mouth = if t % 20.0 < 3.0 { 0.7 } else { 0.03 };
                Some(face.with_ear(ear).with_mouth_open(mouth).with_gaze(0.0, 0.1))
            }
            Scenario::Distracted => {
                let ear = if t % 5.0 < 0.15 { 0.12 } else { 0.3 };
                let gaze_x = if t % 10.0 >= 6.0 { 0.45 } else { 0.05 };
                Some(face.with_ear(ear).with_gaze(gaze_x, 0.05))
            }
            Scenario::Absent => {
                if t % 12.0 >= 8.0 {
                    None
                } else {
                    Some(face.with_ear(if t % 4.0 < 0.15 { 0.12 } else { 0.31 }))
                }
            }
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scenario::Attentive => "attentive",
            Scenario::Drowsy => "drowsy",
            Scenario::Distracted => "distracted",
            Scenario::Absent => "absent",
        };
        write!(f, "{name}")
    }
}

/// A fake camera producing blank frames at a fixed rate.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// End each stream with an error after this many frames
    pub stall_after: Option<u64>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 640,
            height: 480,
            stall_after: None,
        }
    }
}

impl SimulatedCamera {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            ..Self::default()
        }
    }

    pub fn with_stall_after(mut self, frames: u64) -> Self {
        self.stall_after = Some(frames);
        self
    }
}

impl CaptureDevice for SimulatedCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::new(
                CaptureErrorKind::Unsupported,
                "camera reported no resolution",
            ));
        }
        Ok(Box::new(SimulatedStream {
            camera: self.clone(),
            interval: Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1))),
            next_due: Instant::now(),
            sequence: 0,
            open: true,
        }))
    }
}

struct SimulatedStream {
    camera: SimulatedCamera,
    interval: Duration,
    next_due: Instant,
    sequence: u64,
    open: bool,
}

impl FrameSource for SimulatedStream {
    fn name(&self) -> String {
        format!(
            "simulated camera {}x{}@{}fps",
            self.camera.width, self.camera.height, self.camera.fps
        )
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if !self.open {
            return Err(CaptureError::new(CaptureErrorKind::DeviceBusy, "stream closed"));
        }
        if let Some(limit) = self.camera.stall_after {
            if self.sequence >= limit {
                self.open = false;
                return Err(CaptureError::new(
                    CaptureErrorKind::DeviceBusy,
                    "simulated stream stalled",
                ));
            }
        }

        let now = Instant::now();
        if now < self.next_due {
            thread::sleep(self.next_due - now);
        }
        self.next_due += self.interval;

        let frame = Frame::new(self.sequence, self.camera.width, self.camera.height, Vec::new());
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn is_live(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Scripted perception engine.
#[derive(Debug, Clone)]
pub struct SimulatedPerception {
    pub scenario: Scenario,
    /// Frame rate used to turn frame sequence numbers into stream time
    pub fps: u32,
}

impl SimulatedPerception {
    pub fn new(scenario: Scenario, fps: u32) -> Self {
        Self {
            scenario,
            fps: fps.max(1),
        }
    }
}

impl PerceptionBackend for SimulatedPerception {
    fn load(&self) -> Result<Box<dyn PerceptionEngine>, CaptureError> {
        Ok(Box::new(self.clone()))
    }
}

impl PerceptionEngine for SimulatedPerception {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkFrame>, CaptureError> {
        let t = frame.sequence as f64 / f64::from(self.fps);
        Ok(self.scenario.face_at(t).map(|face| face.landmarks()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::extract_features;

    #[test]
    fn test_face_model_round_trips_through_extractor() {
        let face = FaceModel::default()
            .with_ear(0.18)
            .with_mouth_open(0.65)
            .with_gaze(0.1, -0.05);
        let sample = extract_features(&face.landmarks());

        assert!((sample.eye_aspect_ratio - 0.18).abs() < 1e-9);
        assert!((sample.mouth_open_ratio - 0.65).abs() < 1e-9);
        assert!((sample.gaze_offset.x - 0.1).abs() < 1e-9);
        assert!((sample.gaze_offset.y + 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_parsing() {
        assert_eq!(Scenario::parse("Drowsy"), Some(Scenario::Drowsy));
        assert_eq!(Scenario::parse(" absent "), Some(Scenario::Absent));
        assert_eq!(Scenario::parse("sleepy"), None);
    }

    #[test]
    fn test_absent_scenario_leaves_frame() {
        assert!(Scenario::Absent.face_at(1.0).is_some());
        assert!(Scenario::Absent.face_at(9.0).is_none());
    }

    #[test]
    fn test_stream_stalls_after_limit() {
        let camera = SimulatedCamera::new(1000).with_stall_after(2);
        let mut stream = camera.open().unwrap();
        assert!(stream.next_frame().unwrap().is_some());
        assert!(stream.next_frame().unwrap().is_some());
        let err = stream.next_frame().unwrap_err();
        assert_eq!(err.kind(), CaptureErrorKind::DeviceBusy);
        assert!(!stream.is_live());
    }
}
