//! Device orientation from gravity.
//!
//! A background task polls the accelerometer on an interval, classifies
//! the gravity vector, and publishes changes. Reads of the current
//! orientation are lock-free so the capture path can sample it at
//! hardware-callback time without blocking.

use crate::hardware::MotionSource;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Physical orientation of the device, derived from gravity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceOrientation {
    /// No sensor data yet, or no sensor at all.
    Unknown = 0,
    Portrait = 1,
    PortraitUpsideDown = 2,
    LandscapeLeft = 3,
    LandscapeRight = 4,
    FaceUp = 5,
    FaceDown = 6,
}

impl DeviceOrientation {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceOrientation::Portrait,
            2 => DeviceOrientation::PortraitUpsideDown,
            3 => DeviceOrientation::LandscapeLeft,
            4 => DeviceOrientation::LandscapeRight,
            5 => DeviceOrientation::FaceUp,
            6 => DeviceOrientation::FaceDown,
            _ => DeviceOrientation::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceOrientation::Unknown => "unknown",
            DeviceOrientation::Portrait => "portrait",
            DeviceOrientation::PortraitUpsideDown => "portrait-upside-down",
            DeviceOrientation::LandscapeLeft => "landscape-left",
            DeviceOrientation::LandscapeRight => "landscape-right",
            DeviceOrientation::FaceUp => "face-up",
            DeviceOrientation::FaceDown => "face-down",
        }
    }
}

impl std::fmt::Display for DeviceOrientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a gravity vector into a device orientation.
///
/// Axis magnitudes are compared strictly, in order: a dominant z axis
/// means the device lies flat, then y distinguishes the portrait pair,
/// otherwise x picks the landscape side. Ties fall through to the next
/// rule, so the function is total and never returns `Unknown`.
pub fn classify(x: f64, y: f64, z: f64) -> DeviceOrientation {
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
    if az > ax && az > ay {
        if z > 0.0 {
            DeviceOrientation::FaceDown
        } else {
            DeviceOrientation::FaceUp
        }
    } else if ay > ax {
        if y > 0.0 {
            DeviceOrientation::PortraitUpsideDown
        } else {
            DeviceOrientation::Portrait
        }
    } else if x > 0.0 {
        DeviceOrientation::LandscapeRight
    } else {
        DeviceOrientation::LandscapeLeft
    }
}

/// Samples a [`MotionSource`] and keeps a debounced orientation cell.
///
/// The cell only changes, and watchers are only notified, when the
/// classified orientation differs from the previous one.
pub struct OrientationSensor {
    source: Arc<dyn MotionSource>,
    current: Arc<AtomicU8>,
    tx: watch::Sender<DeviceOrientation>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OrientationSensor {
    /// Default polling interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

    pub fn new(source: Arc<dyn MotionSource>) -> Self {
        let (tx, _) = watch::channel(DeviceOrientation::Unknown);
        let (shutdown, _) = broadcast::channel(1);
        Self {
            source,
            current: Arc::new(AtomicU8::new(DeviceOrientation::Unknown as u8)),
            tx,
            shutdown,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Spawn the sampling task.
    ///
    /// Does nothing when the motion source reports itself unavailable;
    /// the orientation then stays [`DeviceOrientation::Unknown`].
    /// Calling this while already running is a no-op.
    pub fn start(&self, interval: Duration) {
        if !self.source.is_available() {
            warn!("motion source unavailable, orientation stays unknown");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("orientation sensor already running");
            return;
        }

        let source = Arc::clone(&self.source);
        let current = Arc::clone(&self.current);
        let tx = self.tx.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                interval_ms = interval.as_millis() as u64,
                "orientation sampling started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(sample) = source.sample().await else {
                            continue;
                        };
                        let next = classify(sample.x, sample.y, sample.z);
                        let prev = DeviceOrientation::from_u8(
                            current.swap(next as u8, Ordering::SeqCst),
                        );
                        if next != prev {
                            debug!(from = %prev, to = %next, "orientation changed");
                            tx.send_replace(next);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            info!("orientation sampling stopped");
        });

        *self.task.lock().unwrap() = Some(handle);
    }

    /// Signal the sampling task to exit. Returns immediately; the task
    /// winds down on its own. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(());
        self.task.lock().unwrap().take();
    }

    /// Latest debounced orientation. Lock-free, callable from anywhere.
    pub fn current(&self) -> DeviceOrientation {
        DeviceOrientation::from_u8(self.current.load(Ordering::SeqCst))
    }

    /// Watch orientation changes. Receivers see at most one
    /// notification per actual change.
    pub fn subscribe(&self) -> watch::Receiver<DeviceOrientation> {
        self.tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for OrientationSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimMotion;
    use tokio::time::sleep;

    const G: f64 = 9.8;

    #[test]
    fn classify_cardinal_vectors() {
        assert_eq!(classify(0.0, -G, 0.0), DeviceOrientation::Portrait);
        assert_eq!(classify(0.0, G, 0.0), DeviceOrientation::PortraitUpsideDown);
        assert_eq!(classify(-G, 0.0, 0.0), DeviceOrientation::LandscapeLeft);
        assert_eq!(classify(G, 0.0, 0.0), DeviceOrientation::LandscapeRight);
        assert_eq!(classify(0.0, 0.0, G), DeviceOrientation::FaceDown);
        assert_eq!(classify(0.0, 0.0, -G), DeviceOrientation::FaceUp);
    }

    #[test]
    fn classify_tilted_vectors() {
        // Mostly portrait with a bit of roll.
        assert_eq!(classify(2.0, -9.5, 1.0), DeviceOrientation::Portrait);
        // Mostly flat on a wobbly table.
        assert_eq!(classify(1.0, 2.0, 9.4), DeviceOrientation::FaceDown);
        // Leaning landscape.
        assert_eq!(classify(8.0, -5.0, 2.0), DeviceOrientation::LandscapeRight);
    }

    #[test]
    fn classify_ties_fall_through() {
        // |z| ties |y|: flat rule skipped, y wins the portrait rule.
        assert_eq!(classify(0.0, -7.0, 7.0), DeviceOrientation::Portrait);
        // |y| ties |x|: portrait rule skipped, x sign picks landscape.
        assert_eq!(classify(7.0, 7.0, 0.0), DeviceOrientation::LandscapeRight);
        // All zero: every rule falls through.
        assert_eq!(classify(0.0, 0.0, 0.0), DeviceOrientation::LandscapeLeft);
    }

    #[test]
    fn orientation_round_trips_through_u8() {
        for o in [
            DeviceOrientation::Unknown,
            DeviceOrientation::Portrait,
            DeviceOrientation::PortraitUpsideDown,
            DeviceOrientation::LandscapeLeft,
            DeviceOrientation::LandscapeRight,
            DeviceOrientation::FaceUp,
            DeviceOrientation::FaceDown,
        ] {
            assert_eq!(DeviceOrientation::from_u8(o as u8), o);
        }
        assert_eq!(DeviceOrientation::from_u8(200), DeviceOrientation::Unknown);
    }

    #[tokio::test]
    async fn sensor_publishes_only_on_change() {
        let motion = Arc::new(SimMotion::holding(0.0, -G, 0.0));
        let sensor = OrientationSensor::new(motion.clone());
        let mut rx = sensor.subscribe();

        sensor.start(Duration::from_millis(5));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), DeviceOrientation::Portrait);
        assert_eq!(sensor.current(), DeviceOrientation::Portrait);

        // Many more ticks of the same reading: no further notifications.
        sleep(Duration::from_millis(100)).await;
        assert!(!rx.has_changed().unwrap());

        motion.set_sample(G, 0.0, 0.0);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), DeviceOrientation::LandscapeRight);

        sensor.stop();
    }

    #[tokio::test]
    async fn unavailable_source_leaves_orientation_unknown() {
        let motion = Arc::new(SimMotion::holding(0.0, -G, 0.0));
        motion.set_available(false);
        let sensor = OrientationSensor::new(motion);

        sensor.start(Duration::from_millis(5));
        assert!(!sensor.is_running());
        sleep(Duration::from_millis(30)).await;
        assert_eq!(sensor.current(), DeviceOrientation::Unknown);
    }

    #[tokio::test]
    async fn missing_samples_skip_ticks() {
        let motion = Arc::new(SimMotion::new());
        let sensor = OrientationSensor::new(motion.clone());

        sensor.start(Duration::from_millis(5));
        sleep(Duration::from_millis(30)).await;
        assert_eq!(sensor.current(), DeviceOrientation::Unknown);

        motion.set_sample(0.0, -G, 0.0);
        sleep(Duration::from_millis(30)).await;
        assert_eq!(sensor.current(), DeviceOrientation::Portrait);

        sensor.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let motion = Arc::new(SimMotion::holding(0.0, -G, 0.0));
        let sensor = OrientationSensor::new(motion);
        sensor.start(Duration::from_millis(5));
        sensor.stop();
        sensor.stop();
        sleep(Duration::from_millis(20)).await;
        assert!(!sensor.is_running());
    }
}
