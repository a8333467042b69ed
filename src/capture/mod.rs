//! Capture and perception collaborator contracts.
//!
//! The camera and the landmark model live outside this crate. They are reached
//! through the traits below; `simulated` provides in-process stand-ins.

pub mod simulated;
pub mod types;

// Re-export commonly used types
pub use simulated::{FaceModel, Scenario, SimulatedCamera, SimulatedPerception};
pub use types::{
    CaptureError, CaptureErrorKind, Frame, Landmark, LandmarkFrame, PerceptionResult,
};

/// A capture device that can be opened into a live frame source.
pub trait CaptureDevice: Send + Sync {
    /// Acquire the device. Called from a blocking worker; may take a while.
    fn open(&self) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// A live stream of frames.
pub trait FrameSource: Send {
    /// Human-readable device name.
    fn name(&self) -> String;

    /// Wait for the next frame.
    ///
    /// `Ok(None)` means no frame is ready yet. An error means the stream is gone.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Whether the underlying stream is still attached.
    fn is_live(&self) -> bool {
        true
    }

    /// Release the device.
    fn close(&mut self) {}
}

/// Loader for the landmark model.
pub trait PerceptionBackend: Send + Sync {
    fn load(&self) -> Result<Box<dyn PerceptionEngine>, CaptureError>;
}

/// A loaded landmark model.
pub trait PerceptionEngine: Send {
    /// Detect the face in a frame. `Ok(None)` means no face.
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkFrame>, CaptureError>;

    fn close(&mut self) {}
}
