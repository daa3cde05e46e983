//! Pixel to ground-plane projection.
//!
//! This is a flat-ground linear approximation: the camera is assumed to look
//! straight down on a plane spanning `fov_x × fov_y` meters, centered on the
//! camera's ground position. Perspective, tilt, lens distortion and the
//! configured rotation are not modeled.

use crate::config::CameraConfig;

/// Estimated ground position in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldPosition {
    pub x: f64,
    pub y: f64,
}

/// Project one pixel to the ground plane.
///
/// `width`, `height`, `fov_x` and `fov_y` must be positive, which
/// `CameraConfig` guarantees.
#[allow(clippy::too_many_arguments)]
pub fn image_to_world(
    px: f64,
    py: f64,
    width: f64,
    height: f64,
    fov_x: f64,
    fov_y: f64,
    cam_x: f64,
    cam_y: f64,
) -> WorldPosition {
    let norm_x = px / width - 0.5;
    let norm_y = py / height - 0.5;
    WorldPosition {
        x: cam_x + norm_x * fov_x,
        y: cam_y + norm_y * fov_y,
    }
}

/// The projection inputs taken from a `CameraConfig` once, at startup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundProjector {
    width: f64,
    height: f64,
    fov: [f64; 2],
    camera: [f64; 2],
}

impl GroundProjector {
    pub fn new(camera: &CameraConfig) -> Self {
        let [cam_x, cam_y, _] = camera.position();
        Self {
            width: f64::from(camera.width()),
            height: f64::from(camera.height()),
            fov: camera.fov(),
            camera: [cam_x, cam_y],
        }
    }

    /// Project a pixel of a frame at the configured resolution.
    pub fn project(&self, px: f64, py: f64) -> WorldPosition {
        image_to_world(
            px,
            py,
            self.width,
            self.height,
            self.fov[0],
            self.fov[1],
            self.camera[0],
            self.camera[1],
        )
    }
}
