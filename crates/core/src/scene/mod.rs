//! Scene graph for the placed object: lights, anchors and object nodes.

use std::{collections::BTreeMap, fmt, sync::Arc};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    collection::CollectionSink,
    config::{LightConfig, SceneConfig},
    placement::{PlacementKind, PlacementTarget},
    session::{AnchorHandle, AnchorId, TrackingSession},
    Pose, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LightId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    pub direction: Vec3,
    pub cast_shadows: bool,
}

impl From<&LightConfig> for DirectionalLight {
    fn from(config: &LightConfig) -> Self {
        Self {
            color: Vec3::from_array(config.color),
            intensity: config.intensity,
            direction: Vec3::from_array(config.direction).normalize_or_zero(),
            cast_shadows: config.cast_shadows,
        }
    }
}

/// Result of delivering a tap to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapOutcome {
    /// The tap was consumed and must not propagate.
    Handled,
    /// No handler: unknown node or the handler was already used.
    Ignored,
}

/// One-shot tap behavior of a placed object.
pub struct TapHandler {
    object_id: u32,
    sink: Arc<dyn CollectionSink>,
    on_collected: Box<dyn FnOnce() + Send>,
}

impl TapHandler {
    pub fn new(
        object_id: u32,
        sink: Arc<dyn CollectionSink>,
        on_collected: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            object_id,
            sink,
            on_collected: Box::new(on_collected),
        }
    }

    /// Signals collection, then runs the completion callback.
    fn fire(self) -> TapOutcome {
        self.sink.collected(self.object_id);
        (self.on_collected)();
        TapOutcome::Handled
    }
}

impl fmt::Debug for TapHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapHandler")
            .field("object_id", &self.object_id)
            .finish_non_exhaustive()
    }
}

/// The placed 3D object, bound to its anchor.
#[derive(Debug)]
pub struct ObjectNode {
    pub id: NodeId,
    pub anchor: AnchorHandle,
    pub kind: PlacementKind,
    pub model_asset: String,
    pub scale_to_units: f32,
    /// Rotation relative to the anchor.
    pub local_rotation: Quat,
    tap: Option<TapHandler>,
}

impl ObjectNode {
    pub fn world_pose(&self) -> Pose {
        Pose::new(
            (self.anchor.pose.rotation * self.local_rotation).normalize(),
            self.anchor.pose.translation,
        )
    }

    pub fn accepts_taps(&self) -> bool {
        self.tap.is_some()
    }
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    lights: BTreeMap<LightId, DirectionalLight>,
    nodes: BTreeMap<NodeId, ObjectNode>,
    next_id: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_light(&mut self, light: DirectionalLight) -> LightId {
        let id = LightId(self.allocate_id());
        self.lights.insert(id, light);
        id
    }

    pub fn remove_light(&mut self, id: LightId) -> Option<DirectionalLight> {
        self.lights.remove(&id)
    }

    pub fn lights(&self) -> impl Iterator<Item = (&LightId, &DirectionalLight)> {
        self.lights.iter()
    }

    pub fn node(&self, id: NodeId) -> Option<&ObjectNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ObjectNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Anchors `target` in the session and attaches the configured object,
    /// turned to face `camera_position`. The node renders from here on.
    /// Returns the new node and the anchor it is bound to.
    pub fn attach<S: TrackingSession + ?Sized>(
        &mut self,
        session: &mut S,
        target: &PlacementTarget,
        camera_position: Vec3,
        config: &SceneConfig,
        tap: TapHandler,
    ) -> Result<(NodeId, AnchorId)> {
        let anchor = session.create_anchor(target.pose)?;

        let facing = Pose::from_translation(anchor.pose.translation)
            .look_at(camera_position)
            .rotate_yaw(config.yaw_correction_deg);
        let local_rotation = (anchor.pose.rotation.inverse() * facing.rotation).normalize();

        let id = NodeId(self.allocate_id());
        self.nodes.insert(
            id,
            ObjectNode {
                id,
                anchor,
                kind: target.kind,
                model_asset: config.model_asset.clone(),
                scale_to_units: config.scale_to_units,
                local_rotation,
                tap: Some(tap),
            },
        );
        info!(
            node = id.0,
            anchor = anchor.id.0,
            kind = ?target.kind,
            position = ?anchor.pose.translation,
            "object attached"
        );
        Ok((id, anchor.id))
    }

    /// Detaches a node and its anchor.
    pub fn remove_node<S: TrackingSession + ?Sized>(&mut self, session: &mut S, id: NodeId) -> bool {
        match self.nodes.remove(&id) {
            Some(node) => {
                session.detach_anchor(node.anchor.id);
                true
            }
            None => false,
        }
    }

    /// Delivers a tap. The handler is detached on first use, so later taps
    /// are ignored.
    pub fn tap(&mut self, id: NodeId) -> TapOutcome {
        let Some(handler) = self.nodes.get_mut(&id).and_then(|node| node.tap.take()) else {
            debug!(node = id.0, "tap ignored");
            return TapOutcome::Ignored;
        };
        info!(node = id.0, "object tapped");
        handler.fire()
    }

    /// Drops every node, anchor and light.
    pub fn teardown<S: TrackingSession + ?Sized>(&mut self, session: &mut S) {
        for (_, node) in std::mem::take(&mut self.nodes) {
            session.detach_anchor(node.anchor.id);
        }
        self.lights.clear();
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use glam::Vec2;

    use super::*;
    use crate::collection::CollectionLedger;
    use crate::session::{CameraSnapshot, Frame, HitTestHit, HitTester, ImageBuffer};
    use crate::MascotArError;

    #[derive(Default)]
    struct AnchorOnlySession {
        created: Vec<AnchorHandle>,
        detached: Vec<AnchorId>,
        refuse: bool,
    }

    impl HitTester for AnchorOnlySession {
        fn hit_test(&self, _camera: &CameraSnapshot, _pixel: Vec2) -> Vec<HitTestHit> {
            Vec::new()
        }
    }

    impl TrackingSession for AnchorOnlySession {
        fn update(&mut self) -> Option<Frame> {
            None
        }

        fn acquire_image(&mut self, _frame: &Frame) -> Option<ImageBuffer> {
            None
        }

        fn create_anchor(&mut self, pose: Pose) -> Result<AnchorHandle> {
            if self.refuse {
                return Err(MascotArError::Anchor("session paused".to_string()));
            }
            let handle = AnchorHandle {
                id: AnchorId(self.created.len() as u64 + 1),
                pose,
            };
            self.created.push(handle);
            Ok(handle)
        }

        fn detach_anchor(&mut self, anchor: AnchorId) {
            self.detached.push(anchor);
        }
    }

    fn floating_target(position: Vec3) -> PlacementTarget {
        PlacementTarget {
            pose: Pose::from_translation(position),
            kind: PlacementKind::Floating,
            surface: None,
        }
    }

    fn handler(ledger: &Arc<CollectionLedger>, navigated: &Arc<AtomicUsize>) -> TapHandler {
        let navigated = navigated.clone();
        TapHandler::new(1001, ledger.clone(), move || {
            navigated.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn attached_object_faces_the_camera_after_yaw_correction() {
        let mut session = AnchorOnlySession::default();
        let mut scene = SceneGraph::new();
        let ledger = Arc::new(CollectionLedger::new());
        let navigated = Arc::new(AtomicUsize::new(0));

        let (node, anchor) = scene
            .attach(
                &mut session,
                &floating_target(Vec3::new(0.0, 0.0, -1.0)),
                Vec3::ZERO,
                &SceneConfig::default(),
                handler(&ledger, &navigated),
            )
            .unwrap();

        let node = scene.node(node).unwrap();
        assert_eq!(session.created.len(), 1);
        assert_eq!(node.anchor.id, anchor);
        assert_eq!(node.model_asset, "mascot.glb");
        // look-at turns -Z toward the camera; the 180 degree yaw leaves the
        // asset's front (+Z) facing it instead.
        let pose = node.world_pose();
        assert!(pose.backward().abs_diff_eq(Vec3::Z, 1e-5));
        assert!(pose.translation.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
    }

    #[test]
    fn local_rotation_is_relative_to_a_rotated_anchor() {
        let mut session = AnchorOnlySession::default();
        let mut scene = SceneGraph::new();
        let ledger = Arc::new(CollectionLedger::new());
        let navigated = Arc::new(AtomicUsize::new(0));
        let target = PlacementTarget {
            pose: Pose::new(Quat::from_rotation_y(0.7), Vec3::new(2.0, 0.0, 0.0)),
            kind: PlacementKind::Surface,
            surface: None,
        };

        let (id, _) = scene
            .attach(
                &mut session,
                &target,
                Vec3::new(2.0, 0.0, 3.0),
                &SceneConfig::default(),
                handler(&ledger, &navigated),
            )
            .unwrap();

        let pose = scene.node(id).unwrap().world_pose();
        assert!(pose.backward().abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn first_tap_collects_and_navigates_once() {
        let mut session = AnchorOnlySession::default();
        let mut scene = SceneGraph::new();
        let ledger = Arc::new(CollectionLedger::new());
        let navigated = Arc::new(AtomicUsize::new(0));
        let (id, _) = scene
            .attach(
                &mut session,
                &floating_target(Vec3::Z),
                Vec3::ZERO,
                &SceneConfig::default(),
                handler(&ledger, &navigated),
            )
            .unwrap();

        assert_eq!(scene.tap(id), TapOutcome::Handled);
        assert_eq!(scene.tap(id), TapOutcome::Ignored);
        assert_eq!(scene.tap(id), TapOutcome::Ignored);

        assert_eq!(ledger.count(1001), 1);
        assert_eq!(navigated.load(Ordering::SeqCst), 1);
        assert!(!scene.node(id).unwrap().accepts_taps());
        assert_eq!(scene.tap(NodeId(999)), TapOutcome::Ignored);
    }

    #[test]
    fn anchor_failure_attaches_nothing() {
        let mut session = AnchorOnlySession {
            refuse: true,
            ..Default::default()
        };
        let mut scene = SceneGraph::new();
        let ledger = Arc::new(CollectionLedger::new());
        let navigated = Arc::new(AtomicUsize::new(0));

        let result = scene.attach(
            &mut session,
            &floating_target(Vec3::Z),
            Vec3::ZERO,
            &SceneConfig::default(),
            handler(&ledger, &navigated),
        );
        assert!(matches!(result, Err(MascotArError::Anchor(_))));
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn teardown_detaches_anchors_and_lights() {
        let mut session = AnchorOnlySession::default();
        let mut scene = SceneGraph::new();
        let ledger = Arc::new(CollectionLedger::new());
        let navigated = Arc::new(AtomicUsize::new(0));
        let light = scene.add_light(DirectionalLight::from(&LightConfig::default()));
        scene
            .attach(
                &mut session,
                &floating_target(Vec3::Z),
                Vec3::ZERO,
                &SceneConfig::default(),
                handler(&ledger, &navigated),
            )
            .unwrap();

        scene.teardown(&mut session);

        assert_eq!(scene.node_count(), 0);
        assert_eq!(scene.lights().count(), 0);
        assert_eq!(session.detached, vec![AnchorId(1)]);
        assert!(scene.remove_light(light).is_none());
    }

    #[test]
    fn light_direction_is_normalized() {
        let light = DirectionalLight::from(&LightConfig::default());
        assert!((light.direction.length() - 1.0).abs() < 1e-6);
        assert!(light.cast_shadows);
    }
}
