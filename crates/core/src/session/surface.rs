//! Tracked surfaces and hit testing against them.

use std::{cmp::Ordering, sync::Arc};

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use super::{CameraSnapshot, HitTester};
use crate::geometry::{Pose, Ray};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u32);

/// A detected plane. The plane passes through `center` with normal along the
/// center's local +Y; `polygon` is its bounded extent in plane-local (x, z).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSurface {
    pub id: SurfaceId,
    pub center: Pose,
    pub polygon: Vec<Vec2>,
}

impl TrackedSurface {
    /// Axis-aligned rectangle of `width` x `depth` meters around `center`.
    pub fn rectangle(id: SurfaceId, center: Pose, width: f32, depth: f32) -> Self {
        let (hx, hz) = (width * 0.5, depth * 0.5);
        Self {
            id,
            center,
            polygon: vec![
                Vec2::new(-hx, -hz),
                Vec2::new(hx, -hz),
                Vec2::new(hx, hz),
                Vec2::new(-hx, hz),
            ],
        }
    }

    pub fn normal(&self) -> Vec3 {
        self.center.up()
    }

    /// Whether the pose, projected onto the plane, lies inside the polygon.
    pub fn contains_pose(&self, pose: &Pose) -> bool {
        let local = self.center.inverse().apply_point(pose.translation);
        point_in_polygon(Vec2::new(local.x, local.z), &self.polygon)
    }

    /// Intersection with the unbounded plane, as a distance along the ray.
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        let normal = self.normal();
        let denom = normal.dot(ray.direction);
        if denom.abs() < 1e-6 {
            return None;
        }
        let distance = normal.dot(self.center.translation - ray.origin) / denom;
        (distance >= 0.0).then_some(distance)
    }
}

fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let crossing = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < crossing {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// What a hit-test ray struck.
#[derive(Debug, Clone, PartialEq)]
pub enum Trackable {
    Surface(Arc<TrackedSurface>),
    /// A sparse feature point; never a placement target.
    FeaturePoint,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitTestHit {
    pub trackable: Trackable,
    pub hit_pose: Pose,
    /// Distance from the ray origin, in meters.
    pub distance: f32,
}

/// Hit tester over a fixed set of surfaces. Like an unbounded-plane hit
/// test, it reports intersections outside a surface's polygon too.
#[derive(Debug, Clone, Default)]
pub struct PlaneHitTester {
    surfaces: Vec<Arc<TrackedSurface>>,
}

impl PlaneHitTester {
    pub fn new(surfaces: impl IntoIterator<Item = TrackedSurface>) -> Self {
        Self {
            surfaces: surfaces.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn add_surface(&mut self, surface: TrackedSurface) {
        self.surfaces.push(Arc::new(surface));
    }

    pub fn surfaces(&self) -> &[Arc<TrackedSurface>] {
        &self.surfaces
    }
}

impl HitTester for PlaneHitTester {
    fn hit_test(&self, camera: &CameraSnapshot, pixel: Vec2) -> Vec<HitTestHit> {
        let ray = Ray::from_camera(&camera.pose, &camera.intrinsics, pixel);
        let mut hits: Vec<HitTestHit> = self
            .surfaces
            .iter()
            .filter_map(|surface| {
                let distance = surface.intersect(&ray)?;
                Some(HitTestHit {
                    trackable: Trackable::Surface(surface.clone()),
                    hit_pose: Pose::new(surface.center.rotation, ray.at(distance)),
                    distance,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        hits
    }
}
