//! Rigid transforms, camera intrinsics and rays in tracking-session space.
//!
//! Conventions follow the tracking session: right-handed, +Y up, a camera
//! looks down its local -Z axis, image rows grow downward.

use glam::{Mat3, Quat, UVec2, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// A rigid body transform (rotation + translation) in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
        }
    }

    /// Creates a pose with only translation.
    #[must_use]
    pub const fn from_translation(translation: Vec3) -> Self {
        Self {
            rotation: Quat::IDENTITY,
            translation,
        }
    }

    #[must_use]
    pub const fn new(rotation: Quat, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Applies the transform to a point.
    #[must_use]
    pub fn apply_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    /// Applies only the rotation, for direction vectors.
    #[must_use]
    pub fn apply_direction(&self, direction: Vec3) -> Vec3 {
        self.rotation * direction
    }

    /// World-space viewing direction (local -Z).
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.apply_direction(Vec3::NEG_Z)
    }

    /// World-space local +Z axis, opposite the viewing direction.
    #[must_use]
    pub fn backward(&self) -> Vec3 {
        self.apply_direction(Vec3::Z)
    }

    #[must_use]
    pub fn up(&self) -> Vec3 {
        self.apply_direction(Vec3::Y)
    }

    /// Returns the inverse transform.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        Self {
            rotation: inv_rotation,
            translation: inv_rotation * (-self.translation),
        }
    }

    /// Composes this pose with another (self * other): `other` applies first.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Same position, rotated so local -Z points at `target` with +Y kept
    /// as close to world up as possible.
    ///
    /// A target at the pose's own position leaves the rotation unchanged.
    #[must_use]
    pub fn look_at(&self, target: Vec3) -> Self {
        let Some(forward) = (target - self.translation).try_normalize() else {
            return *self;
        };
        let back = -forward;
        let up = if back.cross(Vec3::Y).length_squared() < 1e-8 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let right = up.cross(back).normalize();
        let true_up = back.cross(right);
        let rotation = Quat::from_mat3(&Mat3::from_cols(right, true_up, back)).normalize();
        Self {
            rotation,
            translation: self.translation,
        }
    }

    /// Rotates about the pose's own Y axis by `degrees`.
    #[must_use]
    pub fn rotate_yaw(&self, degrees: f32) -> Self {
        Self {
            rotation: (self.rotation * Quat::from_rotation_y(degrees.to_radians())).normalize(),
            translation: self.translation,
        }
    }
}

/// Pinhole intrinsics of the tracking camera image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in pixels (fx, fy).
    pub focal_length: Vec2,
    /// Principal point in pixels (cx, cy); not necessarily the image center.
    pub principal_point: Vec2,
    pub image_size: UVec2,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            focal_length: Vec2::new(500.0, 500.0),
            principal_point: Vec2::new(320.0, 240.0),
            image_size: UVec2::new(640, 480),
        }
    }
}

impl CameraIntrinsics {
    /// Camera-space direction of the ray through `pixel`, normalized.
    #[must_use]
    pub fn ray_through(&self, pixel: Vec2) -> Vec3 {
        let offset = (pixel - self.principal_point) / self.focal_length;
        Vec3::new(offset.x, -offset.y, -1.0).normalize()
    }
}

/// Half-line in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit length.
    pub direction: Vec3,
}

impl Ray {
    /// World-space ray from the camera center through an image pixel.
    #[must_use]
    pub fn from_camera(pose: &Pose, intrinsics: &CameraIntrinsics, pixel: Vec2) -> Self {
        Self {
            origin: pose.translation,
            direction: pose.apply_direction(intrinsics.ray_through(pixel)).normalize(),
        }
    }

    #[must_use]
    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}
