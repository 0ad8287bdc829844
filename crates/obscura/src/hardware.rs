//! Hardware boundary for cameras and motion sensors.
//!
//! Everything the session and coordinator touch on the way to real
//! hardware sits behind these traits, so tests and the CLI's simulate
//! mode can swap in deterministic implementations.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// One accelerometer reading in device coordinates.
///
/// +x points right, +y points down toward the home edge, +z points out
/// of the back of the screen. A device at rest reads gravity, with a
/// magnitude around 9.8 m/s^2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub taken_at: DateTime<Utc>,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            taken_at: Utc::now(),
        }
    }

    /// Euclidean magnitude of the acceleration vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Which way a camera points relative to the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    Back,
    Front,
}

impl CameraFacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFacing::Back => "back",
            CameraFacing::Front => "front",
        }
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output legs that can be attached to an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Preview,
    PhotoOutput,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Preview => "preview",
            EndpointKind::PhotoOutput => "photo-output",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity and placement of a camera device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
    pub facing: CameraFacing,
}

/// What a configuration transaction applies to the bound device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub auto_focus: bool,
    pub endpoints: Vec<EndpointKind>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            auto_focus: true,
            endpoints: vec![EndpointKind::PhotoOutput],
        }
    }
}

/// An encoded still image as produced by the hardware layer.
#[derive(Debug, Clone)]
pub struct RawPhoto {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub device: DeviceDescriptor,
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("device not found: {id}")]
    DeviceNotFound { id: String },

    #[error("device is closed")]
    DeviceClosed,

    #[error("stream failed to start: {message}")]
    StreamStart { message: String },

    #[error("endpoint {kind} failed: {message}")]
    Endpoint {
        kind: EndpointKind,
        message: String,
    },

    #[error("capture failed: {message}")]
    CaptureFailed { message: String },

    #[error("hardware unavailable: {message}")]
    Unavailable { message: String },
}

/// Source of accelerometer samples.
#[async_trait]
pub trait MotionSource: Send + Sync {
    /// Whether the underlying sensor can deliver samples at all.
    fn is_available(&self) -> bool;

    /// Pull one sample. `None` means no fresh reading this tick.
    async fn sample(&self) -> Option<AccelSample>;
}

/// A single camera device held open by a session.
///
/// There is no cancellation: once `capture_still` starts it runs to
/// completion, and callers that stop waiting must discard the result.
/// Starting an already-streaming device is a no-op.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn descriptor(&self) -> DeviceDescriptor;

    async fn start_stream(&self) -> Result<(), HardwareError>;

    async fn stop_stream(&self) -> Result<(), HardwareError>;

    async fn attach(&self, kind: EndpointKind) -> Result<(), HardwareError>;

    async fn detach(&self, kind: EndpointKind) -> Result<(), HardwareError>;

    async fn set_auto_focus(&self, enabled: bool) -> Result<(), HardwareError>;

    async fn capture_still(&self) -> Result<RawPhoto, HardwareError>;

    async fn close(&self) -> Result<(), HardwareError>;
}

/// Discovery and opening of camera devices.
#[async_trait]
pub trait CameraHost: Send + Sync {
    async fn list_devices(&self) -> Vec<DeviceDescriptor>;

    async fn open(&self, device_id: &str) -> Result<Arc<dyn CameraDevice>, HardwareError>;

    /// Device to use when the caller does not name one.
    fn default_device_id(&self) -> Option<String>;
}
