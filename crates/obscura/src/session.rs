//! Capture session lifecycle and device binding.
//!
//! One session owns at most one open camera device. Every configuration
//! transaction runs under a single binding lock, and an in-flight
//! capture holds the same lock through a lease, so configuration never
//! interleaves with hardware work. The externally visible state lives
//! in an atomic so readers never block.

use crate::hardware::{
    CameraDevice, CameraFacing, CameraHost, CaptureSettings, DeviceDescriptor, HardwareError,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Configuring = 1,
    Ready = 2,
    Running = 3,
    Reconfiguring = 4,
    Stopped = 5,
    Failed = 6,
}

impl SessionState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Configuring,
            2 => SessionState::Ready,
            3 => SessionState::Running,
            4 => SessionState::Reconfiguring,
            5 => SessionState::Stopped,
            6 => SessionState::Failed,
            _ => SessionState::Uninitialized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Configuring => "configuring",
            SessionState::Ready => "ready",
            SessionState::Running => "running",
            SessionState::Reconfiguring => "reconfiguring",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not running (state: {state})")]
    NotRunning { state: SessionState },

    #[error("no camera device available")]
    NoDevice,

    #[error("session failed: {reason}")]
    Failed { reason: String },

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

#[derive(Default)]
struct Binding {
    device: Option<Arc<dyn CameraDevice>>,
    descriptor: Option<DeviceDescriptor>,
    settings: CaptureSettings,
    last_device_id: Option<String>,
    last_failure: Option<String>,
}

/// Exclusive hold on the bound device for the duration of one capture.
///
/// The lease keeps the binding lock, so configuration transactions wait
/// until the hardware work finishes even when the caller has stopped
/// waiting for the result.
pub struct CaptureLease {
    _guard: OwnedMutexGuard<Binding>,
    device: Arc<dyn CameraDevice>,
    descriptor: DeviceDescriptor,
}

impl CaptureLease {
    pub fn device(&self) -> &Arc<dyn CameraDevice> {
        &self.device
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn facing(&self) -> CameraFacing {
        self.descriptor.facing
    }
}

// Manual impl: the device handle and the guard have no Debug.
impl std::fmt::Debug for CaptureLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLease")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// State machine owning the camera device binding.
pub struct CaptureSession {
    host: Arc<dyn CameraHost>,
    state: AtomicU8,
    binding: Arc<Mutex<Binding>>,
}

impl CaptureSession {
    pub fn new(host: Arc<dyn CameraHost>) -> Self {
        Self {
            host,
            state: AtomicU8::new(SessionState::Uninitialized as u8),
            binding: Arc::new(Mutex::new(Binding::default())),
        }
    }

    /// Externally visible state. Lock-free.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, next: SessionState) {
        let prev = SessionState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if prev != next {
            debug!(from = %prev, to = %next, "session state");
        }
    }

    fn fail(&self, binding: &mut Binding, reason: String) {
        warn!(reason = %reason, "session failed");
        binding.last_failure = Some(reason);
        self.set_state(SessionState::Failed);
    }

    /// Build or rebuild the device binding.
    ///
    /// Runs as one transaction under the binding lock: open the device,
    /// attach the requested endpoints, request auto focus (best effort,
    /// a device without the control stays bound), swap the binding.
    /// Lands in `Ready` on success, `Failed` with a recorded reason
    /// otherwise. When no device id is given, the last bound device is
    /// reused, falling back to the back camera (front when no back
    /// camera exists).
    pub async fn configure(
        &self,
        device_id: Option<&str>,
        settings: CaptureSettings,
    ) -> Result<(), SessionError> {
        let mut binding = self.binding.lock().await;
        self.configure_locked(&mut binding, device_id, settings).await
    }

    async fn configure_locked(
        &self,
        binding: &mut Binding,
        device_id: Option<&str>,
        settings: CaptureSettings,
    ) -> Result<(), SessionError> {
        self.set_state(if binding.device.is_some() {
            SessionState::Reconfiguring
        } else {
            SessionState::Configuring
        });

        let mut target = device_id
            .map(str::to_owned)
            .or_else(|| binding.last_device_id.clone());
        if target.is_none() {
            target = self.default_device().await;
        }
        let Some(target) = target else {
            self.fail(binding, "no camera device available".to_string());
            return Err(SessionError::NoDevice);
        };

        // Tear down the old binding before opening the replacement.
        if let Some(old) = binding.device.take() {
            binding.descriptor = None;
            if let Err(e) = old.close().await {
                warn!(error = %e, "closing previous device failed");
            }
        }

        match self.open_and_attach(&target, &settings).await {
            Ok((device, descriptor)) => {
                info!(device = %descriptor.id, facing = %descriptor.facing, "session configured");
                binding.last_device_id = Some(descriptor.id.clone());
                binding.device = Some(device);
                binding.descriptor = Some(descriptor);
                binding.settings = settings;
                binding.last_failure = None;
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.fail(binding, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Device used when the caller names none: back camera when
    /// present, front otherwise, host default as the last resort.
    async fn default_device(&self) -> Option<String> {
        let devices = self.host.list_devices().await;
        devices
            .iter()
            .find(|d| d.facing == CameraFacing::Back)
            .or_else(|| devices.iter().find(|d| d.facing == CameraFacing::Front))
            .map(|d| d.id.clone())
            .or_else(|| self.host.default_device_id())
    }

    async fn open_and_attach(
        &self,
        device_id: &str,
        settings: &CaptureSettings,
    ) -> Result<(Arc<dyn CameraDevice>, DeviceDescriptor), HardwareError> {
        let device = self.host.open(device_id).await?;
        let descriptor = device.descriptor();
        for kind in &settings.endpoints {
            if let Err(e) = device.attach(*kind).await {
                let _ = device.close().await;
                return Err(e);
            }
        }
        if let Err(e) = device.set_auto_focus(settings.auto_focus).await {
            warn!(device = device_id, error = %e, "auto focus not applied");
        }
        Ok((device, descriptor))
    }

    /// Move to `Running`, self-healing when the session is not `Ready`.
    ///
    /// From `Ready` this starts the device stream. From `Running` it is
    /// a no-op. Any other state first reruns the configure transaction
    /// with the last known device and settings.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut binding = self.binding.lock().await;
        match self.state() {
            SessionState::Running => return Ok(()),
            SessionState::Ready => {}
            state => {
                info!(state = %state, "start requested outside ready, rebuilding session");
                let settings = binding.settings.clone();
                self.configure_locked(&mut binding, None, settings).await?;
            }
        }

        let device = binding.device.as_ref().cloned().ok_or(SessionError::NoDevice)?;
        if let Err(e) = device.start_stream().await {
            self.fail(&mut binding, e.to_string());
            return Err(e.into());
        }
        self.set_state(SessionState::Running);
        info!("session running");
        Ok(())
    }

    /// Stop the device stream, keeping the binding. Idempotent.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut binding = self.binding.lock().await;
        if self.state() != SessionState::Running {
            debug!(state = %self.state(), "stop outside running is a no-op");
            return Ok(());
        }
        let device = binding.device.as_ref().cloned().ok_or(SessionError::NoDevice)?;
        if let Err(e) = device.stop_stream().await {
            self.fail(&mut binding, e.to_string());
            return Err(e.into());
        }
        self.set_state(SessionState::Stopped);
        info!("session stopped");
        Ok(())
    }

    /// Replace the bound device, keeping the settings.
    ///
    /// The replacement is opened and fully attached before the old
    /// device is touched, so a failure leaves the previous binding and
    /// state intact. On success the session lands in `Ready` whatever
    /// state it was in.
    pub async fn switch(&self, device_id: &str) -> Result<(), SessionError> {
        let mut binding = self.binding.lock().await;
        let prior = self.state();
        self.set_state(SessionState::Reconfiguring);

        let settings = binding.settings.clone();
        let (device, descriptor) = match self.open_and_attach(device_id, &settings).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(device = device_id, error = %e, "switch failed, keeping current device");
                self.set_state(prior);
                return Err(e.into());
            }
        };

        if let Some(old) = binding.device.take() {
            if prior == SessionState::Running {
                if let Err(e) = old.stop_stream().await {
                    warn!(error = %e, "stopping previous device failed");
                }
            }
            for kind in &settings.endpoints {
                if let Err(e) = old.detach(*kind).await {
                    warn!(kind = %kind, error = %e, "detaching previous device failed");
                }
            }
            if let Err(e) = old.close().await {
                warn!(error = %e, "closing previous device failed");
            }
        }

        let old_id = binding.descriptor.as_ref().map(|d| d.id.clone());
        info!(
            from = old_id.as_deref().unwrap_or("none"),
            to = %descriptor.id,
            "device switched"
        );
        binding.last_device_id = Some(descriptor.id.clone());
        binding.device = Some(device);
        binding.descriptor = Some(descriptor);
        binding.last_failure = None;
        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Claim the binding for one capture.
    ///
    /// Takes the binding lock as an owned guard and re-checks the state
    /// under it, so a configuration racing in cannot invalidate the
    /// device after the check. The returned lease keeps configuration
    /// out until it is dropped.
    pub async fn begin_capture(&self) -> Result<CaptureLease, SessionError> {
        let guard = Arc::clone(&self.binding).lock_owned().await;
        let state = self.state();
        if state == SessionState::Failed {
            let reason = guard
                .last_failure
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(SessionError::Failed { reason });
        }
        if state != SessionState::Running {
            return Err(SessionError::NotRunning { state });
        }
        let device = guard.device.as_ref().cloned().ok_or(SessionError::NoDevice)?;
        let descriptor = guard.descriptor.clone().ok_or(SessionError::NoDevice)?;
        Ok(CaptureLease {
            _guard: guard,
            device,
            descriptor,
        })
    }

    /// Descriptor of the currently bound device, if any.
    pub async fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.binding.lock().await.descriptor.clone()
    }

    /// Applied capture settings.
    pub async fn settings(&self) -> CaptureSettings {
        self.binding.lock().await.settings.clone()
    }

    /// Reason recorded by the most recent failure.
    pub async fn last_failure(&self) -> Option<String> {
        self.binding.lock().await.last_failure.clone()
    }

    /// Stop the stream and close the device.
    pub async fn shutdown(&self) {
        let mut binding = self.binding.lock().await;
        if let Some(device) = binding.device.take() {
            if self.state() == SessionState::Running {
                let _ = device.stop_stream().await;
            }
            if let Err(e) = device.close().await {
                warn!(error = %e, "closing device failed");
            }
        }
        binding.descriptor = None;
        self.set_state(SessionState::Uninitialized);
        info!("session shut down");
    }
}
