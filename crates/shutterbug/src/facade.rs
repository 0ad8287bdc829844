//! One object that wires the capture stack together.
//!
//! The facade owns the session, the orientation sensor, and the
//! coordinator, and exposes the one-call `snap` the CLI needs. It also
//! maps every capture failure to a stable sentence fit for end users.

use obscura::{
    CameraHost, CaptureCoordinator, CaptureError, CapturedPhoto, CaptureSession, CaptureSettings,
    CaptureStatsSnapshot, EndpointKind, MotionSource, OrientationSensor, SessionState,
};
use shutterconf::ShutterConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct CameraFacade {
    session: Arc<CaptureSession>,
    sensor: Arc<OrientationSensor>,
    coordinator: CaptureCoordinator,
    config: ShutterConfig,
}

impl CameraFacade {
    pub fn new(
        host: Arc<dyn CameraHost>,
        motion: Arc<dyn MotionSource>,
        config: ShutterConfig,
    ) -> Self {
        let session = Arc::new(CaptureSession::new(host));
        let sensor = Arc::new(OrientationSensor::new(motion));
        let coordinator = CaptureCoordinator::with_deadline(
            Arc::clone(&session),
            Arc::clone(&sensor),
            config.capture.deadline(),
        );
        Self {
            session,
            sensor,
            coordinator,
            config,
        }
    }

    /// Take one photo.
    ///
    /// Configures the session when a device is named or nothing is
    /// bound yet, starts streaming, waits one sensor period so the
    /// orientation reading is fresh, then captures. `deadline`
    /// overrides the configured per-request deadline.
    pub async fn snap(
        &self,
        device: Option<&str>,
        deadline: Option<Duration>,
    ) -> Result<CapturedPhoto, CaptureError> {
        if !self.sensor.is_running() {
            self.sensor.start(self.config.sensor.interval());
        }

        if device.is_some() || self.session.state() == SessionState::Uninitialized {
            let preferred = self.config.camera.preferred_device.as_str();
            let target = device.or((!preferred.is_empty()).then_some(preferred));
            self.session
                .configure(target, settings_from_config(&self.config))
                .await?;
        }
        self.session.start().await?;

        tokio::time::sleep(self.config.sensor.interval()).await;

        match deadline {
            Some(d) => self.coordinator.capture_photo_within(d).await,
            None => self.coordinator.capture_photo().await,
        }
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.coordinator.stats()
    }

    /// Stop the sensor task and release the camera.
    pub async fn shutdown(&self) {
        self.sensor.stop();
        self.session.shutdown().await;
    }
}

/// Translate the configured endpoint names. Unknown names are logged
/// and skipped; an empty result falls back to the photo output.
fn settings_from_config(config: &ShutterConfig) -> CaptureSettings {
    let mut endpoints = Vec::new();
    for name in &config.camera.endpoints {
        match name.as_str() {
            "photo" => endpoints.push(EndpointKind::PhotoOutput),
            "preview" => endpoints.push(EndpointKind::Preview),
            other => warn!(endpoint = other, "unknown endpoint in config, skipping"),
        }
    }
    if endpoints.is_empty() {
        endpoints.push(EndpointKind::PhotoOutput);
    }
    CaptureSettings {
        auto_focus: config.capture.auto_focus,
        endpoints,
    }
}

/// One stable sentence per capture failure, safe to show end users.
pub fn user_message(err: &CaptureError) -> String {
    match err {
        CaptureError::Busy => {
            "A capture is already in progress. Try again in a moment.".to_string()
        }
        CaptureError::NotReady { .. } => {
            "The camera is warming up. Try again in a moment.".to_string()
        }
        CaptureError::Hardware(_) => {
            "The camera ran into a hardware problem. Try again, and restart the app if it keeps failing.".to_string()
        }
        CaptureError::Timeout { .. } => {
            "The camera took too long to respond. Try again.".to_string()
        }
        CaptureError::ImageDecode { .. } => {
            "The captured photo could not be read. Try again.".to_string()
        }
        CaptureError::Session(_) => {
            "The camera session hit a problem. Restart the app if this keeps happening.".to_string()
        }
    }
}
