//! End-to-end capture flows against the simulated backends.

use image::Rgba;
use obscura::sim::{CallLog, SimCamera, SimHost, SimMotion};
use obscura::{
    CameraFacing, CaptureCoordinator, CaptureError, CaptureSession, CaptureSettings,
    DeviceOrientation, EndpointKind, OrientationSensor, Rotation, SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const G: f64 = 9.8;
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

struct World {
    log: Arc<CallLog>,
    back: Arc<SimCamera>,
    motion: Arc<SimMotion>,
    session: Arc<CaptureSession>,
    sensor: Arc<OrientationSensor>,
    coordinator: Arc<CaptureCoordinator>,
}

fn world() -> World {
    let log = Arc::new(CallLog::default());
    let back = Arc::new(
        SimCamera::new("back0", "Wide Camera", CameraFacing::Back).with_log(Arc::clone(&log)),
    );
    let front = Arc::new(
        SimCamera::new("front0", "Selfie Camera", CameraFacing::Front).with_log(Arc::clone(&log)),
    );
    let host = Arc::new(SimHost::new(vec![Arc::clone(&back), front]));
    let motion = Arc::new(SimMotion::holding(0.0, -G, 0.0));
    let session = Arc::new(CaptureSession::new(host));
    let sensor = Arc::new(OrientationSensor::new(motion.clone()));
    let coordinator = Arc::new(CaptureCoordinator::new(
        Arc::clone(&session),
        Arc::clone(&sensor),
    ));
    World {
        log,
        back,
        motion,
        session,
        sensor,
        coordinator,
    }
}

#[tokio::test]
async fn portrait_snap_runs_the_whole_pipeline() {
    let w = world();
    let settings = CaptureSettings {
        auto_focus: true,
        endpoints: vec![EndpointKind::PhotoOutput],
    };
    w.session.configure(Some("back0"), settings).await.unwrap();
    w.session.start().await.unwrap();
    w.sensor.start(Duration::from_millis(5));
    sleep(Duration::from_millis(25)).await;

    let photo = w.coordinator.capture_photo().await.unwrap();
    assert_eq!(photo.orientation, DeviceOrientation::Portrait);
    assert_eq!(photo.rotation, Rotation::None);
    assert_eq!((photo.width, photo.height), (64, 48));
    assert_eq!(photo.device_id, "back0");
    assert_eq!(photo.image.get_pixel(0, 0), &RED);

    let entries = w.log.entries();
    let order = [
        "open:back0",
        "attach:back0:photo-output",
        "auto_focus:back0:true",
        "start_stream:back0",
        "capture_still:back0",
        "capture_done:back0",
    ];
    let mut last = 0;
    for marker in order {
        let at = entries.iter().position(|e| e == marker).unwrap();
        assert!(at >= last, "{marker} out of order in {entries:?}");
        last = at;
    }
}

#[tokio::test]
async fn landscape_capture_is_rotated_upright() {
    let w = world();
    w.motion.set_sample(-G, 0.0, 0.0);
    w.session.start().await.unwrap();
    w.sensor.start(Duration::from_millis(5));
    sleep(Duration::from_millis(25)).await;

    let photo = w.coordinator.capture_photo().await.unwrap();
    assert_eq!(photo.orientation, DeviceOrientation::LandscapeLeft);
    assert_eq!(photo.rotation, Rotation::Cw90);
    // 64x48 swaps to 48x64 and the marker lands top-right.
    assert_eq!((photo.width, photo.height), (48, 64));
    assert_eq!(photo.image.get_pixel(47, 0), &RED);
}

#[tokio::test]
async fn front_camera_landscape_rotates_the_other_way() {
    let w = world();
    w.motion.set_sample(-G, 0.0, 0.0);
    w.session.configure(Some("front0"), CaptureSettings::default()).await.unwrap();
    w.session.start().await.unwrap();
    w.sensor.start(Duration::from_millis(5));
    sleep(Duration::from_millis(25)).await;

    let photo = w.coordinator.capture_photo().await.unwrap();
    assert_eq!(photo.orientation, DeviceOrientation::LandscapeLeft);
    assert_eq!(photo.rotation, Rotation::Cw270);
    // The opposite quarter turn drops the marker bottom-left.
    assert_eq!((photo.width, photo.height), (48, 64));
    assert_eq!(photo.image.get_pixel(0, 63), &RED);
}

#[tokio::test]
async fn switch_pauses_capture_until_restarted() {
    let w = world();
    w.session.start().await.unwrap();
    w.coordinator.capture_photo().await.unwrap();

    w.session.switch("front0").await.unwrap();
    assert_eq!(w.session.state(), SessionState::Ready);

    // Ready is not Running: the coordinator refuses and heals.
    let err = w.coordinator.capture_photo().await.unwrap_err();
    assert!(matches!(
        err,
        CaptureError::NotReady {
            state: SessionState::Ready
        }
    ));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(w.session.state(), SessionState::Running);

    let photo = w.coordinator.capture_photo().await.unwrap();
    assert_eq!(photo.device_id, "front0");
    assert_eq!(photo.facing, CameraFacing::Front);
}

#[tokio::test]
async fn timed_out_capture_never_surfaces_and_session_recovers() {
    let w = world();
    w.session.start().await.unwrap();
    w.back.set_latency(Duration::from_millis(250));

    let err = w
        .coordinator
        .capture_photo_within(Duration::from_millis(40))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::Timeout { .. }));

    sleep(Duration::from_millis(350)).await;
    let stats = w.coordinator.stats();
    assert_eq!(stats.late_discarded, 1);
    assert_eq!(stats.resolved_ok, 0);

    w.back.set_latency(Duration::ZERO);
    let photo = w.coordinator.capture_photo().await.unwrap();
    assert_eq!(photo.device_id, "back0");
    assert_eq!(w.coordinator.stats().resolved_ok, 1);
}
