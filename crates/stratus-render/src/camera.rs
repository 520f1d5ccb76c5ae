//! Camera intrinsics and pose consumed from the host engine each frame.

use glam::{Mat4, Vec3, Vec4};

/// Projection parameters of the host camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraIntrinsics {
    /// Vertical field of view in radians.
    pub fov_y_radians: f32,
    /// Width / height aspect ratio.
    pub aspect: f32,
    /// Near clip distance, km.
    pub near_km: f32,
    /// Far clip distance, km.
    pub far_km: f32,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fov_y_radians: std::f32::consts::FRAC_PI_3,
            aspect: 16.0 / 9.0,
            near_km: 0.001,
            far_km: 1000.0,
        }
    }
}

/// Per-frame camera state: intrinsics plus the pose matrices supplied by
/// the host (right-handed, camera looks down -Z in camera space).
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub intrinsics: CameraIntrinsics,
    pub camera_to_world: Mat4,
    pub world_to_camera: Mat4,
}

impl Camera {
    pub fn new(intrinsics: CameraIntrinsics, camera_to_world: Mat4, world_to_camera: Mat4) -> Self {
        Self {
            intrinsics,
            camera_to_world,
            world_to_camera,
        }
    }

    /// World-space camera position.
    pub fn position(&self) -> Vec3 {
        self.camera_to_world.w_axis.truncate()
    }

    /// World-space forward direction.
    pub fn forward(&self) -> Vec3 {
        (-self.camera_to_world.z_axis.truncate()).normalize_or_zero()
    }

    /// World-space view ray through normalized screen coordinates.
    ///
    /// `u` runs left to right and `v` top to bottom, both in \[0,1\].
    pub fn ray_direction(&self, u: f32, v: f32) -> Vec3 {
        let tan_half = (self.intrinsics.fov_y_radians * 0.5).tan();
        let x = (2.0 * u - 1.0) * tan_half * self.intrinsics.aspect;
        let y = (1.0 - 2.0 * v) * tan_half;
        (self.camera_to_world * Vec4::new(x, y, -1.0, 0.0))
            .truncate()
            .normalize()
    }
}
