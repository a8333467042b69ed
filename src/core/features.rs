//! Geometric feature extraction from facial landmarks.
//!
//! All functions here are pure. A noisy frame with missing or degenerate points
//! yields neutral values instead of an error, so one bad frame never stalls the
//! pipeline.

use crate::capture::types::{Landmark, LandmarkFrame};
use serde::{Deserialize, Serialize};

/// Six-point left-eye layout: outer corner, two upper lid points, inner corner,
/// two lower lid points.
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];

/// Six-point right-eye layout, same ordering as [`LEFT_EYE`].
pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

/// Upper inner lip.
pub const MOUTH_TOP: usize = 13;
/// Lower inner lip.
pub const MOUTH_BOTTOM: usize = 14;

/// Nose tip, the reference point for gaze.
pub const NOSE_TIP: usize = 4;
/// Outer corner of the left eye, used as its center for gaze.
pub const LEFT_EYE_CENTER: usize = 33;
/// Outer corner of the right eye.
pub const RIGHT_EYE_CENTER: usize = 263;

/// EAR reported when the eyes cannot be measured (open eyes).
pub const NEUTRAL_EAR: f64 = 0.3;

/// Mouth opening reported when the lips cannot be measured.
pub const NEUTRAL_MOUTH_OPEN: f64 = 0.0;

/// Gaze direction relative to the face, in normalized image units.
///
/// Positive `x` is looking right, positive `y` is looking up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeOffset {
    pub x: f64,
    pub y: f64,
}

/// Per-frame geometric features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSample {
    pub eye_aspect_ratio: f64,
    pub mouth_open_ratio: f64,
    pub gaze_offset: GazeOffset,
}

impl FeatureSample {
    /// Features of a relaxed face looking straight at the screen.
    pub const NEUTRAL: FeatureSample = FeatureSample {
        eye_aspect_ratio: NEUTRAL_EAR,
        mouth_open_ratio: NEUTRAL_MOUTH_OPEN,
        gaze_offset: GazeOffset { x: 0.0, y: 0.0 },
    };
}

impl Default for FeatureSample {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Compute all features for one face.
pub fn extract_features(landmarks: &LandmarkFrame) -> FeatureSample {
    FeatureSample {
        eye_aspect_ratio: eye_aspect_ratio(landmarks),
        mouth_open_ratio: mouth_open_ratio(landmarks),
        gaze_offset: gaze_offset(landmarks),
    }
}

/// Mean eye-aspect ratio of both eyes.
pub fn eye_aspect_ratio(landmarks: &LandmarkFrame) -> f64 {
    match (
        single_eye_ratio(landmarks, &LEFT_EYE),
        single_eye_ratio(landmarks, &RIGHT_EYE),
    ) {
        (Some(left), Some(right)) => (left + right) / 2.0,
        _ => NEUTRAL_EAR,
    }
}

fn single_eye_ratio(landmarks: &LandmarkFrame, layout: &[usize; 6]) -> Option<f64> {
    let p = collect_points(landmarks, layout)?;

    let vertical_1 = p[1].distance(&p[5]);
    let vertical_2 = p[2].distance(&p[4]);
    let horizontal = p[0].distance(&p[3]);

    if horizontal <= f64::EPSILON {
        return None;
    }

    let ratio = (vertical_1 + vertical_2) / (2.0 * horizontal);
    ratio.is_finite().then_some(ratio)
}

fn collect_points(landmarks: &LandmarkFrame, layout: &[usize; 6]) -> Option<[Landmark; 6]> {
    let mut points = [Landmark::default(); 6];
    for (slot, &index) in points.iter_mut().zip(layout) {
        *slot = *landmarks.get(index)?;
    }
    Some(points)
}

/// Vertical lip separation.
pub fn mouth_open_ratio(landmarks: &LandmarkFrame) -> f64 {
    match (landmarks.get(MOUTH_TOP), landmarks.get(MOUTH_BOTTOM)) {
        (Some(top), Some(bottom)) => (top.y - bottom.y).abs(),
        _ => NEUTRAL_MOUTH_OPEN,
    }
}

/// Offset between the eye-line midpoint and the nose tip.
pub fn gaze_offset(landmarks: &LandmarkFrame) -> GazeOffset {
    let (Some(nose), Some(left), Some(right)) = (
        landmarks.get(NOSE_TIP),
        landmarks.get(LEFT_EYE_CENTER),
        landmarks.get(RIGHT_EYE_CENTER),
    ) else {
        return GazeOffset::default();
    };

    let mid_x = (left.x + right.x) / 2.0;
    let mid_y = (left.y + right.y) / 2.0;

    GazeOffset {
        x: mid_x - nose.x,
        y: nose.y - mid_y,
    }
}
