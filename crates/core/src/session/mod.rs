//! Boundary with the host's spatial-tracking session.
//!
//! The host owns the session; the placement engine pulls one [`Frame`] per
//! tick, optionally acquires that frame's camera image, hit-tests against
//! the reconstructed environment and asks for anchors.

pub mod surface;

use std::{fmt, sync::Arc, time::Duration};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::{config::SessionConfig, geometry::CameraIntrinsics, Pose, Result};

pub use surface::{HitTestHit, PlaneHitTester, SurfaceId, TrackedSurface, Trackable};

/// Whether the session currently has a reliable camera pose estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    NotTracking,
    Tracking,
}

/// Camera state captured with a frame. Kept by value so recognition results
/// can be resolved against the camera that produced the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    pub pose: Pose,
    pub intrinsics: CameraIntrinsics,
}

impl CameraSnapshot {
    /// Pixel used for placement hit tests: the principal point.
    pub fn optical_center(&self) -> Vec2 {
        self.intrinsics.principal_point
    }
}

/// One tick of the tracking session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub camera: CameraSnapshot,
    pub tracking: TrackingState,
    /// Monotonic time since the session started.
    pub timestamp: Duration,
}

/// Shared, read-only view of camera pixels handed to recognition.
#[derive(Clone)]
pub struct ImageView {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    timestamp: Duration,
}

impl ImageView {
    pub fn new(pixels: impl Into<Arc<[u8]>>, width: u32, height: u32, timestamp: Duration) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            timestamp,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Timestamp of the frame the pixels were taken from.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

impl fmt::Debug for ImageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageView")
            .field("bytes", &self.pixels.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Camera image acquired from the session. The host-side buffer is returned
/// exactly once, when this value is dropped.
pub struct ImageBuffer {
    view: ImageView,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ImageBuffer {
    /// Wraps acquired pixels; `release` hands the buffer back to the host.
    pub fn new(view: ImageView, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            view,
            release: Some(Box::new(release)),
        }
    }

    pub fn view(&self) -> &ImageView {
        &self.view
    }
}

impl Drop for ImageBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("view", &self.view)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Identifier of an anchor inside the tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId(pub u64);

/// Pose pinned to the session's coordinate frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorHandle {
    pub id: AnchorId,
    pub pose: Pose,
}

/// Ray casting against the reconstructed environment.
pub trait HitTester {
    /// Hits along the ray through `pixel` of the given camera, nearest first.
    fn hit_test(&self, camera: &CameraSnapshot, pixel: Vec2) -> Vec<HitTestHit>;
}

/// The host's spatial-tracking session as seen by the placement engine.
pub trait TrackingSession: HitTester {
    /// Applies the requested session features. Hosts that cannot change
    /// them may ignore the call.
    fn configure(&mut self, _config: &SessionConfig) {}

    /// Advances the session and returns the current frame, if any.
    fn update(&mut self) -> Option<Frame>;

    /// Acquires the camera image for `frame`. `None` means no buffer is
    /// available this tick.
    fn acquire_image(&mut self, frame: &Frame) -> Option<ImageBuffer>;

    fn create_anchor(&mut self, pose: Pose) -> Result<AnchorHandle>;

    /// Stops tracking an anchor created by [`TrackingSession::create_anchor`].
    fn detach_anchor(&mut self, anchor: AnchorId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn image_buffer_releases_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let buffer = ImageBuffer::new(
            ImageView::new(vec![0_u8; 16], 4, 4, Duration::from_millis(40)),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let view = buffer.view().clone();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // Views outlive the buffer without releasing again.
        assert_eq!(view.dimensions(), (4, 4));
        assert_eq!(view.timestamp(), Duration::from_millis(40));
        drop(view);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn optical_center_is_principal_point() {
        let mut intrinsics = CameraIntrinsics::default();
        intrinsics.principal_point = Vec2::new(310.5, 242.0);
        let camera = CameraSnapshot {
            pose: Pose::identity(),
            intrinsics,
        };
        assert_eq!(camera.optical_center(), Vec2::new(310.5, 242.0));
    }
}
