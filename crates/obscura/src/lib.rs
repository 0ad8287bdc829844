//! Obscura: Capture Session Core
//!
//! The camera-side component of the Shutterbug system. Owns everything
//! between a capture request and a display-ready photo:
//!
//! - **Orientation** (sampler task): polls an accelerometer, classifies
//!   gravity, and debounces publication of changes
//! - **Session** (state machine): binds exactly one camera device and
//!   serializes configuration transactions against hardware work
//! - **Coordinator** (request broker): resolves each capture exactly
//!   once, racing a deadline against the hardware callback
//! - **Correction** (pure transforms): rotates frames so they display
//!   upright however the device was held
//!
//! Hardware sits behind the traits in [`hardware`]; deterministic
//! simulated implementations live in [`sim`].

pub mod coordinator;
pub mod correct;
pub mod hardware;
pub mod orientation;
pub mod session;
pub mod sim;

pub use coordinator::{
    CaptureCoordinator, CaptureError, CaptureStats, CaptureStatsSnapshot, CapturedPhoto,
};
pub use correct::{apply, correct, rotation_for, CorrectedImage, Rotation};
pub use hardware::{
    AccelSample, CameraDevice, CameraFacing, CameraHost, CaptureSettings, DeviceDescriptor,
    EndpointKind, HardwareError, MotionSource, RawPhoto,
};
pub use orientation::{classify, DeviceOrientation, OrientationSensor};
pub use session::{CaptureLease, CaptureSession, SessionError, SessionState};
