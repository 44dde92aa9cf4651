//! Scripted tracking sessions for replaying placement scenarios.
//!
//! A [`Scenario`] describes camera motion, tracking loss, missing camera
//! images, detected surfaces and what the recognizer answers for each
//! attempt. [`run_scenario`] drives a [`PlacementEngine`] through it tick by
//! tick with tick-based recognition latency, so runs are deterministic.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    collection::CollectionLedger,
    config::{EngineConfig, SessionConfig},
    engine::{EngineStats, PlacementEngine},
    geometry::CameraIntrinsics,
    placement::PlacementKind,
    recognition::{ManualRecognizer, ScriptedResponse},
    scene::{NodeId, TapOutcome},
    session::{
        AnchorHandle, AnchorId, CameraSnapshot, Frame, HitTestHit, HitTester, ImageBuffer,
        ImageView, PlaneHitTester, SurfaceId, TrackedSurface, TrackingSession, TrackingState,
    },
    state::PlacementState,
    status::{PlacementStatus, StatusSnapshot},
    MascotArError, Pose, Result,
};

/// Largest camera image a scripted session will allocate.
pub const MAX_IMAGE_PIXELS: usize = 8192 * 8192;

/// Recognizer behavior for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionStep {
    pub response: ScriptedResponse,
    /// Overrides the scenario's default latency.
    #[serde(default)]
    pub latency_ticks: Option<u32>,
    /// Never completes.
    #[serde(default)]
    pub hang: bool,
}

impl RecognitionStep {
    pub fn spans<I, S>(spans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            response: ScriptedResponse::Spans(spans.into_iter().map(Into::into).collect()),
            latency_ticks: None,
            hang: false,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            response: ScriptedResponse::Error(reason.into()),
            latency_ticks: None,
            hang: false,
        }
    }

    pub fn hang() -> Self {
        Self {
            response: ScriptedResponse::Spans(Vec::new()),
            latency_ticks: None,
            hang: true,
        }
    }

    pub fn with_latency(mut self, ticks: u32) -> Self {
        self.latency_ticks = Some(ticks);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    pub frame_interval_ms: u64,
    pub ticks: u32,
    /// Camera pose at tick 0.
    pub camera: Pose,
    /// Camera translation added per tick.
    pub camera_step: Vec3,
    pub intrinsics: CameraIntrinsics,
    pub not_tracking_ticks: Vec<u32>,
    pub image_unavailable_ticks: Vec<u32>,
    pub surfaces: Vec<TrackedSurface>,
    /// One entry per recognition attempt, in order; afterwards nothing is
    /// recognized.
    pub recognition: Vec<RecognitionStep>,
    /// Ticks between submission and completion.
    pub latency_ticks: u32,
    pub tap_ticks: Vec<u32>,
    /// Camera buffers that may be outstanding at once.
    pub buffer_pool: usize,
    /// Number of initial anchor requests the session refuses.
    pub refuse_anchors: u32,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            frame_interval_ms: 100,
            ticks: 10,
            camera: Pose::identity(),
            camera_step: Vec3::ZERO,
            intrinsics: CameraIntrinsics::default(),
            not_tracking_ticks: Vec::new(),
            image_unavailable_ticks: Vec::new(),
            surfaces: Vec::new(),
            recognition: Vec::new(),
            latency_ticks: 2,
            tap_ticks: Vec::new(),
            buffer_pool: 3,
            refuse_anchors: 0,
        }
    }
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if image_len(&self.intrinsics).is_none() {
            return Err(MascotArError::InvalidInput(
                "intrinsics.image_size must be non-zero and at most 8192x8192 pixels",
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Camera pitched down at a floor; the marker is read on the second
    /// attempt and the object lands on the floor.
    pub fn surface_demo() -> Self {
        Self {
            name: "surface-demo".to_string(),
            ticks: 30,
            camera: Pose::new(
                glam::Quat::from_rotation_x(-60_f32.to_radians()),
                Vec3::new(0.0, 1.5, 0.0),
            ),
            surfaces: vec![TrackedSurface::rectangle(
                SurfaceId(1),
                Pose::from_translation(Vec3::new(0.0, 0.0, -1.0)),
                4.0,
                4.0,
            )],
            recognition: vec![
                RecognitionStep::spans(["Welcome"]),
                RecognitionStep::spans(["대전광역시", "Daejeon"]),
            ],
            tap_ticks: vec![20, 21],
            ..Self::default()
        }
    }

    /// Same script with nothing to hit: the object floats near the camera.
    pub fn floating_demo() -> Self {
        Self {
            name: "floating-demo".to_string(),
            camera: Pose::from_translation(Vec3::new(0.0, 1.5, 0.0)),
            surfaces: Vec::new(),
            ..Self::surface_demo()
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Camera buffer accounting of a [`ScriptedSession`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub acquired: usize,
    pub released: usize,
    pub outstanding: usize,
    /// Acquisitions refused because every buffer was outstanding.
    pub exhausted: usize,
}

#[derive(Debug, Default)]
struct BufferPool {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl BufferPool {
    fn outstanding(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

/// [`TrackingSession`] driven by a [`Scenario`].
#[derive(Debug)]
pub struct ScriptedSession {
    scenario: Scenario,
    hit_tester: PlaneHitTester,
    next_tick: u32,
    current_tick: Option<u32>,
    pool: Arc<BufferPool>,
    exhausted: usize,
    anchors: BTreeMap<AnchorId, AnchorHandle>,
    anchors_created: usize,
    anchor_requests: u32,
    configured: Option<SessionConfig>,
}

impl ScriptedSession {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            hit_tester: PlaneHitTester::new(scenario.surfaces.clone()),
            scenario,
            next_tick: 0,
            current_tick: None,
            pool: Arc::new(BufferPool::default()),
            exhausted: 0,
            anchors: BTreeMap::new(),
            anchors_created: 0,
            anchor_requests: 0,
            configured: None,
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Tick of the most recent frame.
    pub fn current_tick(&self) -> Option<u32> {
        self.current_tick
    }

    pub fn camera_at(&self, tick: u32) -> CameraSnapshot {
        let mut pose = self.scenario.camera;
        pose.translation += self.scenario.camera_step * tick as f32;
        CameraSnapshot {
            pose,
            intrinsics: self.scenario.intrinsics,
        }
    }

    pub fn buffer_stats(&self) -> BufferStats {
        BufferStats {
            acquired: self.pool.acquired.load(Ordering::SeqCst),
            released: self.pool.released.load(Ordering::SeqCst),
            outstanding: self.pool.outstanding(),
            exhausted: self.exhausted,
        }
    }

    pub fn live_anchors(&self) -> impl Iterator<Item = &AnchorHandle> {
        self.anchors.values()
    }

    pub fn anchors_created(&self) -> usize {
        self.anchors_created
    }

    pub fn configured(&self) -> Option<&SessionConfig> {
        self.configured.as_ref()
    }
}

impl HitTester for ScriptedSession {
    fn hit_test(&self, camera: &CameraSnapshot, pixel: Vec2) -> Vec<HitTestHit> {
        self.hit_tester.hit_test(camera, pixel)
    }
}

impl TrackingSession for ScriptedSession {
    fn configure(&mut self, config: &SessionConfig) {
        self.configured = Some(config.clone());
    }

    fn update(&mut self) -> Option<Frame> {
        let tick = self.next_tick;
        if tick >= self.scenario.ticks {
            return None;
        }
        self.next_tick += 1;
        self.current_tick = Some(tick);

        let tracking = if self.scenario.not_tracking_ticks.contains(&tick) {
            TrackingState::NotTracking
        } else {
            TrackingState::Tracking
        };
        Some(Frame {
            camera: self.camera_at(tick),
            tracking,
            timestamp: self.scenario.frame_interval() * tick,
        })
    }

    fn acquire_image(&mut self, frame: &Frame) -> Option<ImageBuffer> {
        let tick = self.current_tick?;
        if self.scenario.image_unavailable_ticks.contains(&tick) {
            return None;
        }
        if self.pool.outstanding() >= self.scenario.buffer_pool {
            self.exhausted += 1;
            debug!(tick, "camera buffer pool exhausted");
            return None;
        }

        let Some(len) = image_len(&frame.camera.intrinsics) else {
            warn!(size = ?frame.camera.intrinsics.image_size, "unusable camera image size");
            return None;
        };

        self.pool.acquired.fetch_add(1, Ordering::SeqCst);
        let size = frame.camera.intrinsics.image_size;
        let pixels = vec![0_u8; len];
        let pool = self.pool.clone();
        Some(ImageBuffer::new(
            ImageView::new(pixels, size.x, size.y, frame.timestamp),
            move || {
                pool.released.fetch_add(1, Ordering::SeqCst);
            },
        ))
    }

    fn create_anchor(&mut self, pose: Pose) -> Result<AnchorHandle> {
        self.anchor_requests += 1;
        if self.anchor_requests <= self.scenario.refuse_anchors {
            return Err(MascotArError::Anchor("tracking session refused anchor".to_string()));
        }
        self.anchors_created += 1;
        let handle = AnchorHandle {
            id: AnchorId(self.anchors_created as u64),
            pose,
        };
        self.anchors.insert(handle.id, handle);
        Ok(handle)
    }

    fn detach_anchor(&mut self, anchor: AnchorId) {
        self.anchors.remove(&anchor);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementSummary {
    pub node: NodeId,
    pub anchor: AnchorId,
    pub kind: PlacementKind,
    pub position: Vec3,
    pub placed_at_ms: u64,
}

/// Outcome of [`run_scenario`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub ticks: u32,
    /// Start time of every recognition attempt.
    pub attempt_starts_ms: Vec<u64>,
    pub placement: Option<PlacementSummary>,
    pub final_state: PlacementState,
    pub status: StatusSnapshot,
    /// Distinct statuses in the order they were shown.
    pub status_history: Vec<PlacementStatus>,
    pub taps: Vec<TapOutcome>,
    pub collected: usize,
    pub navigations: usize,
    pub max_in_flight: usize,
    pub anchors_created: usize,
    pub live_anchors_before_teardown: usize,
    /// Buffer accounting after teardown.
    pub buffers: BufferStats,
    pub stats: EngineStats,
}

/// Replays `scenario` against a fresh engine and tears the session down.
pub fn run_scenario(scenario: Scenario, config: EngineConfig) -> Result<ScenarioReport> {
    scenario.validate()?;
    let object_id = config.scene.object_id;
    let (service, recognizer) = ManualRecognizer::new();
    let ledger = Arc::new(CollectionLedger::new());
    let navigations = Arc::new(AtomicUsize::new(0));
    let nav = navigations.clone();
    let mut engine = PlacementEngine::new(config, service, ledger.clone(), move || {
        nav.fetch_add(1, Ordering::SeqCst);
    })?;
    let status = engine.status();

    let name = scenario.name.clone();
    let ticks = scenario.ticks;
    let default_latency = scenario.latency_ticks;
    let tap_ticks = scenario.tap_ticks.clone();
    let mut steps: VecDeque<RecognitionStep> = scenario.recognition.iter().cloned().collect();
    let mut session = ScriptedSession::new(scenario);

    info!(scenario = %name, ticks, "replaying scenario");

    let mut due: VecDeque<(u32, ScriptedResponse)> = VecDeque::new();
    let mut attempt_starts_ms = Vec::new();
    let mut status_history = vec![status.status()];
    let mut taps = Vec::new();

    for tick in 0..ticks {
        let report = engine.tick(&mut session);

        if report.submitted.is_some() {
            if let Some(at) = report.frame {
                attempt_starts_ms.push(at.as_millis() as u64);
            }
            let step = steps
                .pop_front()
                .unwrap_or_else(|| RecognitionStep::spans(Vec::<String>::new()));
            if !step.hang {
                let latency = step.latency_ticks.unwrap_or(default_latency);
                due.push_back((tick + latency, step.response));
            }
        }

        while due.front().is_some_and(|(at, _)| *at <= tick) {
            if let Some((_, response)) = due.pop_front() {
                recognizer.complete_next(response.into_result());
            }
        }

        if tap_ticks.contains(&tick) {
            if let Some(node) = engine.placed().map(|record| record.node) {
                taps.push(engine.tap(node));
            }
        }

        let current = status.status();
        if status_history.last() != Some(&current) {
            status_history.push(current);
        }
    }

    // Apply whatever completed on the last tick.
    engine.tick(&mut session);

    let placement = engine.placed().and_then(|record| {
        let node = engine.scene().node(record.node)?;
        Some(PlacementSummary {
            node: record.node,
            anchor: record.anchor,
            kind: record.kind,
            position: node.world_pose().translation,
            placed_at_ms: record.placed_at.as_millis() as u64,
        })
    });
    let final_state = engine.state();
    let live_anchors_before_teardown = session.live_anchors().count();
    let stats = engine.teardown(&mut session);

    Ok(ScenarioReport {
        name,
        ticks,
        attempt_starts_ms,
        placement,
        final_state,
        status: status.snapshot(),
        status_history,
        taps,
        collected: ledger.count(object_id),
        navigations: navigations.load(Ordering::SeqCst),
        max_in_flight: recognizer.max_in_flight(),
        anchors_created: session.anchors_created(),
        live_anchors_before_teardown,
        buffers: session.buffer_stats(),
        stats,
    })
}

/// Byte length of a one-byte-per-pixel image, if it is allocatable.
fn image_len(intrinsics: &CameraIntrinsics) -> Option<usize> {
    let size = intrinsics.image_size;
    (size.x as usize)
        .checked_mul(size.y as usize)
        .filter(|len| (1..=MAX_IMAGE_PIXELS).contains(len))
}
