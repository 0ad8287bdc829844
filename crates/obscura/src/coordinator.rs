//! Exactly-once capture resolution.
//!
//! Each request races a deadline against hardware completion. A single
//! atomic gate decides the winner, and the loser's result is discarded.
//! The hardware side owns a session lease for as long as the device is
//! busy, so timed-out work keeps excluding configuration until the
//! device actually finishes.

use crate::correct::{self, Rotation};
use crate::hardware::{CameraFacing, HardwareError, RawPhoto};
use crate::orientation::{DeviceOrientation, OrientationSensor};
use crate::session::{CaptureLease, CaptureSession, SessionError, SessionState};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Another capture request is already in flight.
    #[error("capture already in progress")]
    Busy,

    #[error("session not ready for capture (state: {state})")]
    NotReady { state: SessionState },

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("capture timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("captured image could not be decoded: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A fully resolved capture: decoded and rotated upright for display.
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    pub request_id: Uuid,
    pub image: RgbaImage,
    pub width: u32,
    pub height: u32,
    pub orientation: DeviceOrientation,
    pub rotation: Rotation,
    pub facing: CameraFacing,
    pub device_id: String,
    pub taken_at: DateTime<Utc>,
}

/// Counters for capture outcomes.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub requested: AtomicU64,
    pub resolved_ok: AtomicU64,
    pub busy_rejected: AtomicU64,
    pub not_ready_rejected: AtomicU64,
    pub timed_out: AtomicU64,
    pub hardware_errors: AtomicU64,
    pub decode_errors: AtomicU64,
    pub late_discarded: AtomicU64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            resolved_ok: self.resolved_ok.load(Ordering::Relaxed),
            busy_rejected: self.busy_rejected.load(Ordering::Relaxed),
            not_ready_rejected: self.not_ready_rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            hardware_errors: self.hardware_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            late_discarded: self.late_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`CaptureStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    pub requested: u64,
    pub resolved_ok: u64,
    pub busy_rejected: u64,
    pub not_ready_rejected: u64,
    pub timed_out: u64,
    pub hardware_errors: u64,
    pub decode_errors: u64,
    pub late_discarded: u64,
}

/// Serializes capture requests and resolves each exactly once.
pub struct CaptureCoordinator {
    session: Arc<CaptureSession>,
    sensor: Arc<OrientationSensor>,
    in_flight: AtomicBool,
    default_deadline: Duration,
    stats: Arc<CaptureStats>,
}

impl CaptureCoordinator {
    /// Default time allowed for one capture before it resolves as
    /// timed out.
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

    pub fn new(session: Arc<CaptureSession>, sensor: Arc<OrientationSensor>) -> Self {
        Self::with_deadline(session, sensor, Self::DEFAULT_DEADLINE)
    }

    pub fn with_deadline(
        session: Arc<CaptureSession>,
        sensor: Arc<OrientationSensor>,
        default_deadline: Duration,
    ) -> Self {
        Self {
            session,
            sensor,
            in_flight: AtomicBool::new(false),
            default_deadline,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Capture one still with the default deadline.
    pub async fn capture_photo(&self) -> Result<CapturedPhoto, CaptureError> {
        self.capture_photo_within(self.default_deadline).await
    }

    /// Capture one still, resolving exactly once within `deadline`.
    ///
    /// A second caller while one request is in flight gets `Busy`
    /// without disturbing the first. A session that is not running gets
    /// `NotReady` and a background start so a retry can succeed. On
    /// timeout the request resolves immediately and the hardware result,
    /// whenever it arrives, is discarded.
    pub async fn capture_photo_within(
        &self,
        deadline: Duration,
    ) -> Result<CapturedPhoto, CaptureError> {
        self.stats.requested.fetch_add(1, Ordering::Relaxed);

        let Some(_slot) = SlotGuard::claim(&self.in_flight) else {
            self.stats.busy_rejected.fetch_add(1, Ordering::Relaxed);
            debug!("capture rejected, another request in flight");
            return Err(CaptureError::Busy);
        };

        let state = self.session.state();
        if state != SessionState::Running {
            self.stats.not_ready_rejected.fetch_add(1, Ordering::Relaxed);
            info!(state = %state, "capture rejected, starting session in background");
            self.heal_in_background();
            return Err(CaptureError::NotReady { state });
        }

        let request_id = Uuid::new_v4();
        let gate = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = oneshot::channel();
        debug!(request = %request_id, deadline_ms = deadline.as_millis() as u64, "capture requested");

        // The deadline covers lease acquisition too: a configure stuck
        // ahead of us cannot pin this request past its deadline.
        let raced = {
            let task_gate = Arc::clone(&gate);
            let rx = &mut rx;
            let race = async move {
                let lease = match self.session.begin_capture().await {
                    Ok(lease) => lease,
                    Err(SessionError::NotRunning { state }) => {
                        return Err(CaptureError::NotReady { state });
                    }
                    Err(e) => return Err(e.into()),
                };
                self.spawn_hardware_capture(request_id, lease, task_gate, tx);
                match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(task_ended_early()),
                }
            };
            tokio::time::timeout(deadline, race).await
        };

        match raced {
            Ok(outcome) => self.finish(request_id, outcome),
            Err(_) => {
                if claim(&gate) {
                    // The hardware task will see the claimed gate and
                    // discard whatever it produces.
                    self.finish(request_id, Err(CaptureError::Timeout { after: deadline }))
                } else {
                    // The callback won at the wire; collect its result.
                    match (&mut rx).await {
                        Ok(outcome) => self.finish(request_id, outcome),
                        Err(_) => self.finish(request_id, Err(task_ended_early())),
                    }
                }
            }
        }
    }

    fn spawn_hardware_capture(
        &self,
        request_id: Uuid,
        lease: CaptureLease,
        gate: Arc<AtomicBool>,
        tx: oneshot::Sender<Result<CapturedPhoto, CaptureError>>,
    ) {
        let sensor = Arc::clone(&self.sensor);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let device = Arc::clone(lease.device());
            let facing = lease.facing();
            let device_id = lease.descriptor().id.clone();

            let raw = device.capture_still().await;
            drop(lease);

            if !claim(&gate) {
                stats.late_discarded.fetch_add(1, Ordering::Relaxed);
                warn!(request = %request_id, "discarding late capture result");
                return;
            }

            let outcome = match raw {
                Ok(photo) => {
                    // Orientation is sampled now, at callback time, not
                    // when the request was issued.
                    resolve_photo(request_id, photo, facing, device_id, sensor.current())
                }
                Err(e) => Err(CaptureError::Hardware(e)),
            };

            if tx.send(outcome).is_err() {
                warn!(request = %request_id, "capture caller went away before delivery");
            }
        });
    }

    fn finish(
        &self,
        request_id: Uuid,
        outcome: Result<CapturedPhoto, CaptureError>,
    ) -> Result<CapturedPhoto, CaptureError> {
        match &outcome {
            Ok(photo) => {
                self.stats.resolved_ok.fetch_add(1, Ordering::Relaxed);
                info!(
                    request = %request_id,
                    width = photo.width,
                    height = photo.height,
                    orientation = %photo.orientation,
                    rotation = %photo.rotation,
                    "capture resolved"
                );
            }
            Err(CaptureError::Timeout { after }) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(request = %request_id, after_ms = after.as_millis() as u64, "capture timed out");
            }
            Err(CaptureError::Hardware(e)) => {
                self.stats.hardware_errors.fetch_add(1, Ordering::Relaxed);
                warn!(request = %request_id, error = %e, "capture failed in hardware");
            }
            Err(CaptureError::ImageDecode { source }) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(request = %request_id, error = %source, "captured bytes did not decode");
            }
            Err(CaptureError::NotReady { state }) => {
                // Only the in-race rejection reaches here; the
                // pre-flight one returned before the race began.
                self.stats.not_ready_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(request = %request_id, state = %state, "session left running state before capture");
                self.heal_in_background();
            }
            Err(e) => {
                error!(request = %request_id, error = %e, "capture failed");
            }
        }
        outcome
    }

    fn heal_in_background(&self) {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            if let Err(e) = session.start().await {
                warn!(error = %e, "background session start failed");
            }
        });
    }

    /// Counters since construction.
    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn default_deadline(&self) -> Duration {
        self.default_deadline
    }
}

fn resolve_photo(
    request_id: Uuid,
    raw: RawPhoto,
    facing: CameraFacing,
    device_id: String,
    orientation: DeviceOrientation,
) -> Result<CapturedPhoto, CaptureError> {
    let decoded = image::load_from_memory(&raw.data)
        .map_err(|source| CaptureError::ImageDecode { source })?
        .to_rgba8();
    let corrected = correct::correct(&decoded, orientation, facing);
    let (width, height) = corrected.image.dimensions();
    Ok(CapturedPhoto {
        request_id,
        image: corrected.image,
        width,
        height,
        orientation,
        rotation: corrected.rotation,
        facing,
        device_id,
        taken_at: Utc::now(),
    })
}

fn task_ended_early() -> CaptureError {
    CaptureError::Hardware(HardwareError::CaptureFailed {
        message: "capture task ended without a result".into(),
    })
}

fn claim(gate: &AtomicBool) -> bool {
    gate.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Clears the in-flight flag when the caller's future resolves.
struct SlotGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SlotGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(Self { flag })
        } else {
            None
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCamera, SimHost, SimMotion};
    use bytes::Bytes;
    use tokio::time::sleep;

    struct Rig {
        camera: Arc<SimCamera>,
        motion: Arc<SimMotion>,
        session: Arc<CaptureSession>,
        sensor: Arc<OrientationSensor>,
        coordinator: Arc<CaptureCoordinator>,
    }

    fn rig_with(camera: SimCamera) -> Rig {
        let camera = Arc::new(camera);
        let host = Arc::new(SimHost::new(vec![Arc::clone(&camera)]));
        let motion = Arc::new(SimMotion::holding(0.0, -9.8, 0.0));
        let session = Arc::new(CaptureSession::new(host));
        let sensor = Arc::new(OrientationSensor::new(motion.clone()));
        let coordinator = Arc::new(CaptureCoordinator::new(
            Arc::clone(&session),
            Arc::clone(&sensor),
        ));
        Rig {
            camera,
            motion,
            session,
            sensor,
            coordinator,
        }
    }

    fn rig() -> Rig {
        rig_with(SimCamera::new("cam0", "Test Camera", CameraFacing::Back))
    }

    #[tokio::test]
    async fn capture_resolves_with_corrected_photo() {
        let r = rig();
        r.session.start().await.unwrap();
        r.sensor.start(Duration::from_millis(5));
        sleep(Duration::from_millis(20)).await;

        let photo = r.coordinator.capture_photo().await.unwrap();
        assert_eq!(photo.orientation, DeviceOrientation::Portrait);
        assert_eq!(photo.rotation, Rotation::None);
        assert_eq!(photo.device_id, "cam0");
        assert_eq!((photo.width, photo.height), (64, 48));

        let stats = r.coordinator.stats();
        assert_eq!(stats.requested, 1);
        assert_eq!(stats.resolved_ok, 1);
    }

    #[tokio::test]
    async fn second_caller_gets_busy_without_disturbing_first() {
        let r = rig();
        r.session.start().await.unwrap();
        r.camera.set_latency(Duration::from_millis(150));

        let c = Arc::clone(&r.coordinator);
        let first = tokio::spawn(async move { c.capture_photo().await });
        sleep(Duration::from_millis(30)).await;

        let err = r.coordinator.capture_photo().await.unwrap_err();
        assert!(matches!(err, CaptureError::Busy));

        let photo = first.await.unwrap().unwrap();
        assert_eq!(photo.device_id, "cam0");
        let stats = r.coordinator.stats();
        assert_eq!(stats.busy_rejected, 1);
        assert_eq!(stats.resolved_ok, 1);
    }

    #[tokio::test]
    async fn not_ready_rejects_and_heals_in_background() {
        let r = rig();

        let err = r.coordinator.capture_photo().await.unwrap_err();
        assert!(matches!(
            err,
            CaptureError::NotReady {
                state: SessionState::Uninitialized
            }
        ));

        // The background start brings the session up for a retry.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(r.session.state(), SessionState::Running);
        r.coordinator.capture_photo().await.unwrap();
    }

    #[tokio::test]
    async fn timeout_resolves_and_late_result_is_discarded() {
        let r = rig();
        r.session.start().await.unwrap();
        r.camera.set_latency(Duration::from_millis(200));

        let err = r
            .coordinator
            .capture_photo_within(Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Timeout { .. }));

        // Let the zombie capture finish and hit the claimed gate.
        sleep(Duration::from_millis(300)).await;
        let stats = r.coordinator.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.late_discarded, 1);
        assert_eq!(stats.resolved_ok, 0);

        // The slot is free again; a fresh request succeeds.
        r.camera.set_latency(Duration::ZERO);
        r.coordinator.capture_photo().await.unwrap();
    }

    #[tokio::test]
    async fn deadline_tie_resolves_exactly_once() {
        let r = rig();
        r.session.start().await.unwrap();

        let deadline = Duration::from_millis(20);
        let mut ok = 0u64;
        let mut timed_out = 0u64;
        for i in 0..12u64 {
            // Latency sweeps across the deadline so either side of the
            // race can win, including dead heats.
            r.camera.set_latency(Duration::from_millis(15 + 5 * (i % 3)));
            match r.coordinator.capture_photo_within(deadline).await {
                Ok(photo) => {
                    assert_eq!(photo.device_id, "cam0");
                    ok += 1;
                }
                Err(CaptureError::Timeout { .. }) => timed_out += 1,
                Err(other) => panic!("capture must resolve ok or timed out, got {other}"),
            }
            // Drain the losing side before the next request.
            sleep(Duration::from_millis(50)).await;
        }

        let stats = r.coordinator.stats();
        assert_eq!(stats.requested, 12);
        assert_eq!(stats.resolved_ok, ok);
        assert_eq!(stats.timed_out, timed_out);
        assert_eq!(ok + timed_out, 12);
        // Every abandoned capture was discarded exactly once.
        assert_eq!(stats.late_discarded, timed_out);
        assert_eq!(stats.busy_rejected, 0);
        assert_eq!(stats.hardware_errors, 0);
    }

    #[tokio::test]
    async fn stop_racing_a_capture_heals_in_background() {
        let r = rig();
        r.session.start().await.unwrap();
        r.camera.set_latency(Duration::from_millis(120));

        // Abandon a capture so its hardware task keeps the lease.
        let err = r
            .coordinator
            .capture_photo_within(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Timeout { .. }));

        // Queue a stop behind the lease, then a capture behind the
        // stop. The pre-flight check still sees a running session, so
        // the stop is only caught once the lease is acquired.
        let s = Arc::clone(&r.session);
        let stop = tokio::spawn(async move { s.stop().await });
        sleep(Duration::from_millis(10)).await;

        let err = r
            .coordinator
            .capture_photo_within(Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::NotReady {
                state: SessionState::Stopped
            }
        ));
        stop.await.unwrap().unwrap();

        // The rejection kicked off a background start.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(r.session.state(), SessionState::Running);
        r.camera.set_latency(Duration::ZERO);
        r.coordinator.capture_photo().await.unwrap();
    }

    #[tokio::test]
    async fn zombie_capture_still_blocks_configuration() {
        let r = rig();
        r.session.start().await.unwrap();
        r.camera.set_latency(Duration::from_millis(200));

        let err = r
            .coordinator
            .capture_photo_within(Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Timeout { .. }));

        // The lease is still held by the abandoned hardware task.
        let s = Arc::clone(&r.session);
        let reconfigure = tokio::spawn(async move {
            s.configure(None, Default::default()).await
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!reconfigure.is_finished());

        reconfigure.await.unwrap().unwrap();
        let entries = r.camera.log().entries();
        let done_at = entries.iter().position(|e| e == "capture_done:cam0").unwrap();
        let reopen_at = entries.iter().rposition(|e| e == "open:cam0").unwrap();
        assert!(done_at < reopen_at, "configure waits for the zombie capture");
    }

    #[tokio::test]
    async fn hardware_failure_is_reported() {
        let r = rig();
        r.session.start().await.unwrap();
        r.camera.fail_next_capture("sensor fault");

        let err = r.coordinator.capture_photo().await.unwrap_err();
        assert!(matches!(err, CaptureError::Hardware(_)));
        assert_eq!(r.coordinator.stats().hardware_errors, 1);
    }

    #[tokio::test]
    async fn undecodable_bytes_are_a_decode_error() {
        let r = rig();
        r.session.start().await.unwrap();
        r.camera.set_photo_bytes(Bytes::from_static(b"not an image"));

        let err = r.coordinator.capture_photo().await.unwrap_err();
        assert!(matches!(err, CaptureError::ImageDecode { .. }));
        assert_eq!(r.coordinator.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn orientation_is_sampled_at_callback_time() {
        let r = rig();
        r.session.start().await.unwrap();
        r.sensor.start(Duration::from_millis(5));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(r.sensor.current(), DeviceOrientation::Portrait);

        r.camera.set_latency(Duration::from_millis(100));
        let c = Arc::clone(&r.coordinator);
        let capture = tokio::spawn(async move { c.capture_photo().await });

        // Rotate the device while the shutter is held open.
        sleep(Duration::from_millis(20)).await;
        r.motion.set_sample(9.8, 0.0, 0.0);

        let photo = capture.await.unwrap().unwrap();
        assert_eq!(photo.orientation, DeviceOrientation::LandscapeRight);
        assert_eq!(photo.rotation, Rotation::Cw270);
    }

    #[tokio::test]
    async fn front_camera_inverts_landscape_rotation() {
        let r = rig_with(SimCamera::new("front0", "Front Camera", CameraFacing::Front));
        r.motion.set_sample(-9.8, 0.0, 0.0);
        r.session.start().await.unwrap();
        r.sensor.start(Duration::from_millis(5));
        sleep(Duration::from_millis(20)).await;

        // A back camera would rotate Cw90 here.
        let photo = r.coordinator.capture_photo().await.unwrap();
        assert_eq!(photo.orientation, DeviceOrientation::LandscapeLeft);
        assert_eq!(photo.rotation, Rotation::Cw270);
        assert_eq!(photo.facing, CameraFacing::Front);
    }

    #[test]
    fn gate_claim_is_exclusive() {
        let gate = AtomicBool::new(false);
        assert!(claim(&gate));
        assert!(!claim(&gate));
    }

    #[test]
    fn slot_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _slot = SlotGuard::claim(&flag).unwrap();
            assert!(SlotGuard::claim(&flag).is_none());
        }
        assert!(SlotGuard::claim(&flag).is_some());
    }
}
