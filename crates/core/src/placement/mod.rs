//! Where the object goes once the marker text has been recognized.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::PlacementConfig,
    recognition::DetectionResult,
    session::{CameraSnapshot, HitTestHit, HitTester, SurfaceId, Trackable},
    Pose,
};

/// How the target pose was obtained; drives the status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementKind {
    Surface,
    Floating,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementTarget {
    pub pose: Pose,
    pub kind: PlacementKind,
    /// Surface the pose lies on, for surface placements.
    pub surface: Option<SurfaceId>,
}

#[derive(Debug, Clone)]
pub struct PlacementResolver {
    marker_text: String,
    floating_distance: f32,
}

impl PlacementResolver {
    pub fn new(config: &PlacementConfig) -> Self {
        Self {
            marker_text: config.marker_text.clone(),
            floating_distance: config.floating_distance_m,
        }
    }

    pub fn marker_text(&self) -> &str {
        &self.marker_text
    }

    /// Resolves a placement for a detection, or `None` when the marker text
    /// is absent.
    ///
    /// `camera` must be the camera of the frame whose image produced the
    /// detection, not the latest frame.
    pub fn resolve<H: HitTester + ?Sized>(
        &self,
        detection: &DetectionResult,
        camera: &CameraSnapshot,
        hit_tester: &H,
    ) -> Option<PlacementTarget> {
        if !detection.contains_marker(&self.marker_text) {
            return None;
        }
        Some(self.target_for(camera, hit_tester))
    }

    /// Surface placement if the optical-center ray hits a bounded surface,
    /// floating placement otherwise. Always succeeds.
    pub fn target_for<H: HitTester + ?Sized>(
        &self,
        camera: &CameraSnapshot,
        hit_tester: &H,
    ) -> PlacementTarget {
        let hits = hit_tester.hit_test(camera, camera.optical_center());
        if let Some((surface, hit)) = select_surface_hit(&hits) {
            debug!(surface = surface.0, distance = hit.distance, "placing on tracked surface");
            return PlacementTarget {
                pose: hit.hit_pose,
                kind: PlacementKind::Surface,
                surface: Some(surface),
            };
        }

        debug!(hits = hits.len(), "no bounded surface hit; placing floating");
        PlacementTarget {
            pose: self.floating_pose(&camera.pose),
            kind: PlacementKind::Floating,
            surface: None,
        }
    }

    /// Camera position offset along the camera's backward (+Z) axis, with
    /// identity rotation.
    pub fn floating_pose(&self, camera: &Pose) -> Pose {
        Pose::from_translation(camera.translation + camera.backward() * self.floating_distance)
    }
}

/// First hit on a tracked surface whose pose lies inside that surface's
/// polygon. Hits on the plane's unbounded extension do not qualify.
pub fn select_surface_hit(hits: &[HitTestHit]) -> Option<(SurfaceId, &HitTestHit)> {
    hits.iter().find_map(|hit| match &hit.trackable {
        Trackable::Surface(surface) if surface.contains_pose(&hit.hit_pose) => {
            Some((surface.id, hit))
        }
        _ => None,
    })
}
