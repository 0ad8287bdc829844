//! Deterministic in-process camera and motion backends.
//!
//! Used by the test suites and by the CLI's simulate mode. The camera
//! renders a small PNG with a red marker in the top-left corner, so
//! rotation is observable in pixel asserts, and records every hardware
//! call so tests can check interleaving.

use crate::hardware::{
    AccelSample, CameraDevice, CameraFacing, CameraHost, DeviceDescriptor, EndpointKind,
    HardwareError, MotionSource, RawPhoto,
};
use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records hardware calls in order so tests can assert interleaving.
#[derive(Debug, Default)]
pub struct CallLog {
    entries: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// Scripted accelerometer.
pub struct SimMotion {
    available: AtomicBool,
    sample: Mutex<Option<(f64, f64, f64)>>,
}

impl SimMotion {
    /// Available but with no reading yet.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            sample: Mutex::new(None),
        }
    }

    /// Available and holding one fixed reading.
    pub fn holding(x: f64, y: f64, z: f64) -> Self {
        let motion = Self::new();
        motion.set_sample(x, y, z);
        motion
    }

    pub fn set_sample(&self, x: f64, y: f64, z: f64) {
        *self.sample.lock().unwrap() = Some((x, y, z));
    }

    pub fn clear_sample(&self) {
        *self.sample.lock().unwrap() = None;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for SimMotion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionSource for SimMotion {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn sample(&self) -> Option<AccelSample> {
        let held = *self.sample.lock().unwrap();
        held.map(|(x, y, z)| AccelSample::new(x, y, z))
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    opened: bool,
    streaming: bool,
    attached: Vec<EndpointKind>,
    auto_focus: bool,
    fail_next_capture: Option<String>,
    photo_override: Option<Bytes>,
}

/// Simulated camera device with configurable latency and failure
/// injection.
pub struct SimCamera {
    descriptor: DeviceDescriptor,
    width: u32,
    height: u32,
    latency_ms: AtomicU64,
    fail_open: AtomicBool,
    fail_auto_focus: AtomicBool,
    state: Mutex<DeviceState>,
    log: Arc<CallLog>,
}

impl SimCamera {
    pub fn new(id: &str, label: &str, facing: CameraFacing) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                id: id.to_string(),
                label: label.to_string(),
                facing,
            },
            width: 64,
            height: 48,
            latency_ms: AtomicU64::new(0),
            fail_open: AtomicBool::new(false),
            fail_auto_focus: AtomicBool::new(false),
            state: Mutex::new(DeviceState::default()),
            log: Arc::new(CallLog::default()),
        }
    }

    /// Share a call log with other devices so cross-device ordering is
    /// observable.
    pub fn with_log(mut self, log: Arc<CallLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.log)
    }

    /// Artificial delay between shutter and completion.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make the next `capture_still` fail with the given message.
    pub fn fail_next_capture(&self, message: impl Into<String>) {
        self.state.lock().unwrap().fail_next_capture = Some(message.into());
    }

    /// Replace the rendered frame with fixed bytes (valid or not).
    pub fn set_photo_bytes(&self, data: Bytes) {
        self.state.lock().unwrap().photo_override = Some(data);
    }

    /// Make the host refuse to open this device.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `set_auto_focus` report the control as unsupported.
    pub fn set_fail_auto_focus(&self, fail: bool) {
        self.fail_auto_focus.store(fail, Ordering::SeqCst);
    }

    fn reset_for_open(&self) {
        let mut state = self.state.lock().unwrap();
        state.opened = true;
        state.streaming = false;
        state.attached.clear();
        self.log.push(format!("open:{}", self.descriptor.id));
    }
}

#[async_trait]
impl CameraDevice for SimCamera {
    fn descriptor(&self) -> DeviceDescriptor {
        self.descriptor.clone()
    }

    async fn start_stream(&self) -> Result<(), HardwareError> {
        self.log.push(format!("start_stream:{}", self.descriptor.id));
        let mut state = self.state.lock().unwrap();
        if !state.opened {
            return Err(HardwareError::DeviceClosed);
        }
        state.streaming = true;
        Ok(())
    }

    async fn stop_stream(&self) -> Result<(), HardwareError> {
        self.log.push(format!("stop_stream:{}", self.descriptor.id));
        self.state.lock().unwrap().streaming = false;
        Ok(())
    }

    async fn attach(&self, kind: EndpointKind) -> Result<(), HardwareError> {
        self.log.push(format!("attach:{}:{}", self.descriptor.id, kind));
        let mut state = self.state.lock().unwrap();
        if !state.opened {
            return Err(HardwareError::DeviceClosed);
        }
        if !state.attached.contains(&kind) {
            state.attached.push(kind);
        }
        Ok(())
    }

    async fn detach(&self, kind: EndpointKind) -> Result<(), HardwareError> {
        self.log.push(format!("detach:{}:{}", self.descriptor.id, kind));
        self.state.lock().unwrap().attached.retain(|k| *k != kind);
        Ok(())
    }

    async fn set_auto_focus(&self, enabled: bool) -> Result<(), HardwareError> {
        self.log
            .push(format!("auto_focus:{}:{}", self.descriptor.id, enabled));
        let mut state = self.state.lock().unwrap();
        if !state.opened {
            return Err(HardwareError::DeviceClosed);
        }
        if self.fail_auto_focus.load(Ordering::SeqCst) {
            return Err(HardwareError::Unavailable {
                message: format!("focus control unsupported on {}", self.descriptor.id),
            });
        }
        state.auto_focus = enabled;
        Ok(())
    }

    async fn capture_still(&self) -> Result<RawPhoto, HardwareError> {
        self.log.push(format!("capture_still:{}", self.descriptor.id));
        {
            let state = self.state.lock().unwrap();
            if !state.opened {
                return Err(HardwareError::DeviceClosed);
            }
            if !state.streaming {
                return Err(HardwareError::CaptureFailed {
                    message: "stream not running".to_string(),
                });
            }
        }

        let latency = Duration::from_millis(self.latency_ms.load(Ordering::Relaxed));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let injected = {
            let mut state = self.state.lock().unwrap();
            state.fail_next_capture.take()
        };
        if let Some(message) = injected {
            return Err(HardwareError::CaptureFailed { message });
        }

        let data = {
            let state = self.state.lock().unwrap();
            state.photo_override.clone()
        };
        let data = match data {
            Some(bytes) => bytes,
            None => render_frame(self.width, self.height)?,
        };
        self.log.push(format!("capture_done:{}", self.descriptor.id));
        Ok(RawPhoto {
            data,
            width: self.width,
            height: self.height,
            device: self.descriptor.clone(),
        })
    }

    async fn close(&self) -> Result<(), HardwareError> {
        self.log.push(format!("close:{}", self.descriptor.id));
        let mut state = self.state.lock().unwrap();
        state.opened = false;
        state.streaming = false;
        state.attached.clear();
        Ok(())
    }
}

/// Host over a fixed table of simulated devices.
pub struct SimHost {
    devices: Vec<Arc<SimCamera>>,
}

impl SimHost {
    pub fn new(devices: Vec<Arc<SimCamera>>) -> Self {
        Self { devices }
    }

    /// A back and a front camera, the back one default.
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            Arc::new(SimCamera::new(
                "sim-back",
                "Simulated Back Camera",
                CameraFacing::Back,
            )),
            Arc::new(SimCamera::new(
                "sim-front",
                "Simulated Front Camera",
                CameraFacing::Front,
            )),
        ])
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<SimCamera>> {
        self.devices
            .iter()
            .find(|d| d.descriptor.id == device_id)
            .cloned()
    }
}

#[async_trait]
impl CameraHost for SimHost {
    async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.iter().map(|d| d.descriptor.clone()).collect()
    }

    async fn open(&self, device_id: &str) -> Result<Arc<dyn CameraDevice>, HardwareError> {
        let device = self
            .devices
            .iter()
            .find(|d| d.descriptor.id == device_id)
            .ok_or_else(|| HardwareError::DeviceNotFound {
                id: device_id.to_string(),
            })?;
        if device.fail_open.load(Ordering::SeqCst) {
            return Err(HardwareError::Unavailable {
                message: format!("simulated open failure for {device_id}"),
            });
        }
        device.reset_for_open();
        Ok(device.clone())
    }

    fn default_device_id(&self) -> Option<String> {
        self.devices.first().map(|d| d.descriptor.id.clone())
    }
}

fn render_frame(width: u32, height: u32) -> Result<Bytes, HardwareError> {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([32, 48, 64, 255]));
    for y in 0..height.min(4) {
        for x in 0..width.min(4) {
            img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
        }
    }
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| HardwareError::CaptureFailed {
            message: format!("frame encoding failed: {e}"),
        })?;
    Ok(Bytes::from(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rendered_frame_decodes_with_marker() {
        let data = render_frame(16, 8).unwrap();
        let img = image::load_from_memory(&data).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (16, 8));
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(15, 7), &Rgba([32, 48, 64, 255]));
    }

    #[tokio::test]
    async fn capture_requires_open_and_streaming() {
        let host = SimHost::with_default_devices();
        let camera = host.device("sim-back").unwrap();

        let err = camera.capture_still().await.unwrap_err();
        assert!(matches!(err, HardwareError::DeviceClosed));

        let opened = host.open("sim-back").await.unwrap();
        let err = opened.capture_still().await.unwrap_err();
        assert!(matches!(err, HardwareError::CaptureFailed { .. }));

        opened.start_stream().await.unwrap();
        let photo = opened.capture_still().await.unwrap();
        assert_eq!((photo.width, photo.height), (64, 48));
    }

    #[tokio::test]
    async fn close_forgets_attachments() {
        let host = SimHost::with_default_devices();
        let device = host.open("sim-front").await.unwrap();
        device.attach(EndpointKind::PhotoOutput).await.unwrap();
        device.close().await.unwrap();

        let err = device.attach(EndpointKind::Preview).await.unwrap_err();
        assert!(matches!(err, HardwareError::DeviceClosed));
    }

    #[tokio::test]
    async fn unknown_device_cannot_be_opened() {
        let host = SimHost::with_default_devices();
        let result = host.open("ghost").await;
        assert!(matches!(result, Err(HardwareError::DeviceNotFound { .. })));
    }
}
