//! Rotation correction for captured stills.
//!
//! Pure pixel-space transforms: the capture pipeline decides what was
//! applied and records it alongside the output, nothing here touches
//! hardware or clocks.

use crate::hardware::CameraFacing;
use crate::orientation::DeviceOrientation;
use image::{imageops, RgbaImage};

/// Clockwise rotation applied to a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Degrees clockwise.
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Whether this rotation swaps width and height.
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}deg", self.degrees())
    }
}

/// Rotation that makes a frame display upright for the given
/// orientation and camera facing.
///
/// Front cameras look back at the user, so the landscape cases rotate
/// the opposite way from the back camera. Flat or unknown orientations
/// leave the frame untouched.
pub fn rotation_for(orientation: DeviceOrientation, facing: CameraFacing) -> Rotation {
    match orientation {
        DeviceOrientation::Portrait => Rotation::None,
        DeviceOrientation::PortraitUpsideDown => Rotation::Cw180,
        DeviceOrientation::LandscapeLeft => match facing {
            CameraFacing::Back => Rotation::Cw90,
            CameraFacing::Front => Rotation::Cw270,
        },
        DeviceOrientation::LandscapeRight => match facing {
            CameraFacing::Back => Rotation::Cw270,
            CameraFacing::Front => Rotation::Cw90,
        },
        DeviceOrientation::FaceUp | DeviceOrientation::FaceDown | DeviceOrientation::Unknown => {
            Rotation::None
        }
    }
}

/// Apply a rotation, producing a new buffer.
///
/// Quarter turns recompute the bounds, so width and height swap for 90
/// and 270 degrees.
pub fn apply(image: &RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::None => image.clone(),
        Rotation::Cw90 => imageops::rotate90(image),
        Rotation::Cw180 => imageops::rotate180(image),
        Rotation::Cw270 => imageops::rotate270(image),
    }
}

/// A corrected frame plus a record of what was applied.
#[derive(Debug, Clone)]
pub struct CorrectedImage {
    pub image: RgbaImage,
    pub rotation: Rotation,
    pub orientation: DeviceOrientation,
}

/// Correct a decoded frame for display given how the device was held.
pub fn correct(
    image: &RgbaImage,
    orientation: DeviceOrientation,
    facing: CameraFacing,
) -> CorrectedImage {
    let rotation = rotation_for(orientation, facing);
    CorrectedImage {
        image: apply(image, rotation),
        rotation,
        orientation,
    }
}
