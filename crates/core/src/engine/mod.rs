//! The per-tick placement loop.
//!
//! Everything here runs on the host's tick thread. Recognition runs out of
//! line and its outcomes are drained from a queue at the start of each tick,
//! so placement state and the scene graph have a single writer.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    collection::CollectionSink,
    config::EngineConfig,
    placement::{PlacementResolver, PlacementTarget},
    recognition::{
        AttemptId, CompletionQueue, CompletionSender, DetectionResult, RecognitionJob,
        RecognitionOutcome, RecognitionService,
    },
    scene::{DirectionalLight, LightId, NodeId, SceneGraph, TapHandler, TapOutcome},
    session::{CameraSnapshot, TrackingSession},
    state::{InFlightAttempt, PlacedRecord, PlacementState, PlacementStateMachine},
    status::{PlacementStatus, StatusBoard, StatusReader},
    throttle::{GateDecision, RecognitionGate},
    Result,
};

/// Counters describing a session so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub ticks: u64,
    pub attempts: u64,
    /// Outcomes matched to the attempt in flight.
    pub completions: u64,
    pub recognition_failures: u64,
    pub submit_failures: u64,
    pub matches: u64,
    /// Ticks that passed the gate but had no camera image.
    pub acquisition_skips: u64,
    /// Outcomes that arrived for no in-flight attempt.
    pub discarded_completions: u64,
    /// Qualifying matches that lost to an existing placement.
    pub placement_races: u64,
    pub anchor_failures: u64,
    pub stalled_attempts: u64,
    pub taps_handled: u64,
    pub taps_ignored: u64,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickReport {
    /// Timestamp of the frame polled this tick.
    pub frame: Option<Duration>,
    pub gate: Option<GateDecision>,
    pub submitted: Option<AttemptId>,
    /// Set on the tick the object was placed.
    pub placed: Option<PlacedRecord>,
}

pub struct PlacementEngine {
    config: EngineConfig,
    gate: RecognitionGate,
    state: PlacementStateMachine,
    resolver: PlacementResolver,
    scene: SceneGraph,
    status: StatusBoard,
    service: Box<dyn RecognitionService>,
    completions: CompletionQueue,
    reply: CompletionSender,
    sink: Arc<dyn CollectionSink>,
    on_collected: Arc<dyn Fn() + Send + Sync>,
    light: Option<LightId>,
    last_camera: Option<CameraSnapshot>,
    last_frame_at: Duration,
    next_attempt: u64,
    started: bool,
    stats: EngineStats,
}

impl PlacementEngine {
    /// `on_collected` runs once, when the placed object is first tapped.
    pub fn new<R, F>(
        config: EngineConfig,
        service: R,
        sink: Arc<dyn CollectionSink>,
        on_collected: F,
    ) -> Result<Self>
    where
        R: RecognitionService + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        config.validate()?;
        let (reply, completions) = CompletionQueue::new();
        Ok(Self {
            gate: RecognitionGate::new(config.throttle.min_interval()),
            state: PlacementStateMachine::new(),
            resolver: PlacementResolver::new(&config.placement),
            scene: SceneGraph::new(),
            status: StatusBoard::new(config.status.clone(), config.placement.marker_text.clone()),
            service: Box::new(service),
            completions,
            reply,
            sink,
            on_collected: Arc::new(on_collected),
            light: None,
            last_camera: None,
            last_frame_at: Duration::ZERO,
            next_attempt: 0,
            started: false,
            stats: EngineStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> PlacementState {
        self.state.state()
    }

    pub fn placed(&self) -> Option<&PlacedRecord> {
        self.state.placed()
    }

    pub fn in_flight(&self) -> Option<&InFlightAttempt> {
        self.state.in_flight()
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn status(&self) -> StatusReader {
        self.status.reader()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Configures the session and lights the scene. Called by the first
    /// [`tick`](Self::tick) if the host has not done so.
    pub fn start<S: TrackingSession + ?Sized>(&mut self, session: &mut S) {
        if self.started {
            return;
        }
        session.configure(&self.config.session);
        self.light = Some(
            self.scene
                .add_light(DirectionalLight::from(&self.config.scene.light)),
        );
        self.started = true;
        info!(marker = %self.resolver.marker_text(), "placement session started");
    }

    /// One cooperative step of the frame loop.
    pub fn tick<S: TrackingSession + ?Sized>(&mut self, session: &mut S) -> TickReport {
        self.start(session);
        self.stats.ticks += 1;

        let mut report = TickReport::default();
        for outcome in self.completions.drain() {
            if let Some(record) = self.handle_outcome(session, outcome) {
                report.placed = Some(record);
            }
        }

        let Some(frame) = session.update() else {
            return report;
        };
        report.frame = Some(frame.timestamp);
        self.last_camera = Some(frame.camera);
        self.last_frame_at = frame.timestamp;
        self.check_stalled(frame.timestamp);

        let decision = self
            .gate
            .evaluate(self.state.state(), frame.tracking, frame.timestamp);
        report.gate = Some(decision);
        if let GateDecision::Reject(reason) = decision {
            debug!(?reason, at = ?frame.timestamp, "frame not used for recognition");
            return report;
        }

        let Some(image) = session.acquire_image(&frame) else {
            self.stats.acquisition_skips += 1;
            debug!(at = ?frame.timestamp, "no camera image this tick");
            return report;
        };

        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        let view = image.view().clone();

        // In flight before the service sees the job.
        self.gate.record_attempt(frame.timestamp);
        if let Err(rejected) = self.state.begin_recognition(InFlightAttempt::new(
            attempt,
            frame.camera,
            image,
            frame.timestamp,
        )) {
            warn!(attempt = rejected.attempt.0, "recognition already in flight; dropping attempt");
            return report;
        }
        self.stats.attempts += 1;

        let job = RecognitionJob {
            attempt,
            image: view,
            reply: self.reply.clone(),
        };
        match self.service.submit(job) {
            Ok(()) => {
                debug!(attempt = attempt.0, at = ?frame.timestamp, "recognition submitted");
                report.submitted = Some(attempt);
            }
            Err(err) => {
                warn!(attempt = attempt.0, %err, "recognition service refused job");
                self.stats.submit_failures += 1;
                self.state.finish_recognition(attempt);
            }
        }
        report
    }

    /// Delivers a tap on `node` from the presentation layer.
    pub fn tap(&mut self, node: NodeId) -> TapOutcome {
        let outcome = self.scene.tap(node);
        match outcome {
            TapOutcome::Handled => {
                self.stats.taps_handled += 1;
                self.status.publish(PlacementStatus::Collected);
            }
            TapOutcome::Ignored => self.stats.taps_ignored += 1,
        }
        outcome
    }

    /// Removes the object, its anchor and the light. Any in-flight image is
    /// released when the engine drops.
    pub fn teardown<S: TrackingSession + ?Sized>(mut self, session: &mut S) -> EngineStats {
        self.scene.teardown(session);
        self.light = None;
        info!(stats = ?self.stats, "placement session torn down");
        std::mem::take(&mut self.stats)
    }

    fn handle_outcome<S: TrackingSession + ?Sized>(
        &mut self,
        session: &mut S,
        outcome: RecognitionOutcome,
    ) -> Option<PlacedRecord> {
        let Some(attempt) = self.state.finish_recognition(outcome.attempt) else {
            self.discard_outcome(outcome);
            return None;
        };
        self.stats.completions += 1;
        if self.status.current() == PlacementStatus::Stalled {
            self.status.publish(PlacementStatus::Searching);
        }

        let spans = match outcome.result {
            Ok(spans) => spans,
            Err(err) => {
                warn!(attempt = attempt.attempt.0, %err, "recognition failed; still searching");
                self.stats.recognition_failures += 1;
                return None;
            }
        };

        let detection = DetectionResult::from_spans(&spans, attempt.source_timestamp);
        let Some(target) = self.resolver.resolve(&detection, &attempt.camera, &*session) else {
            debug!(attempt = attempt.attempt.0, spans = spans.len(), "marker not recognized");
            return None;
        };
        self.stats.matches += 1;
        info!(
            attempt = attempt.attempt.0,
            source = ?attempt.source_timestamp,
            kind = ?target.kind,
            "marker recognized"
        );

        let camera = self.last_camera.unwrap_or(attempt.camera);
        self.place(session, &target, camera)
    }

    fn discard_outcome(&mut self, outcome: RecognitionOutcome) {
        self.stats.discarded_completions += 1;
        let matched = outcome.result.as_ref().is_ok_and(|spans| {
            DetectionResult::from_spans(spans, Duration::ZERO)
                .contains_marker(self.resolver.marker_text())
        });
        if matched && self.state.is_placed() {
            self.stats.placement_races += 1;
            warn!(attempt = outcome.attempt.0, "late match after placement discarded");
        } else {
            debug!(attempt = outcome.attempt.0, "stale recognition outcome discarded");
        }
    }

    fn place<S: TrackingSession + ?Sized>(
        &mut self,
        session: &mut S,
        target: &PlacementTarget,
        camera: CameraSnapshot,
    ) -> Option<PlacedRecord> {
        if let Some(existing) = self.state.placed() {
            self.stats.placement_races += 1;
            warn!(existing = existing.node.0, "object already placed; ignoring match");
            return None;
        }

        let on_collected = self.on_collected.clone();
        let handler = TapHandler::new(self.config.scene.object_id, self.sink.clone(), move || {
            on_collected()
        });
        let (node, anchor) = match self.scene.attach(
            session,
            target,
            camera.pose.translation,
            &self.config.scene,
            handler,
        ) {
            Ok(attached) => attached,
            Err(err) => {
                self.stats.anchor_failures += 1;
                warn!(%err, "could not anchor object; still searching");
                return None;
            }
        };

        let record = PlacedRecord {
            node,
            anchor,
            kind: target.kind,
            placed_at: self.last_frame_at,
        };
        if let Err(race) = self.state.latch_placed(record) {
            self.stats.placement_races += 1;
            warn!(%race, "placement lost the race; removing duplicate");
            self.scene.remove_node(session, node);
            return None;
        }

        self.status.publish(PlacementStatus::from(target.kind));
        info!(node = node.0, kind = ?target.kind, "object placed");
        Some(record)
    }

    fn check_stalled(&mut self, now: Duration) {
        let stuck_after = self.config.throttle.stuck_after();
        let Some(attempt) = self.state.in_flight_mut() else {
            return;
        };
        if attempt.stall_reported || now.saturating_sub(attempt.started_at) < stuck_after {
            return;
        }
        attempt.stall_reported = true;
        let id = attempt.attempt;
        self.stats.stalled_attempts += 1;
        warn!(
            attempt = id.0,
            waited = ?now.saturating_sub(attempt.started_at),
            "recognition still in flight; further attempts are blocked"
        );
        self.status.publish(PlacementStatus::Stalled);
    }
}

impl std::fmt::Debug for PlacementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementEngine")
            .field("state", &self.state.state())
            .field("nodes", &self.scene.node_count())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use glam::Vec3;

    use super::*;
    use crate::{
        collection::CollectionLedger,
        config::FocusMode,
        placement::PlacementKind,
        recognition::{ManualRecognizer, ManualRecognizerHandle},
        session::{SurfaceId, TrackedSurface},
        sim::{Scenario, ScriptedSession},
        throttle::GateRejection,
        Pose,
    };

    struct Harness {
        engine: PlacementEngine,
        session: ScriptedSession,
        recognizer: ManualRecognizerHandle,
        ledger: Arc<CollectionLedger>,
        navigations: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(scenario: Scenario) -> Self {
            Self::with_config(scenario, EngineConfig::default())
        }

        fn with_config(scenario: Scenario, config: EngineConfig) -> Self {
            let (service, recognizer) = ManualRecognizer::new();
            let ledger = Arc::new(CollectionLedger::new());
            let navigations = Arc::new(AtomicUsize::new(0));
            let nav = navigations.clone();
            let engine = PlacementEngine::new(config, service, ledger.clone(), move || {
                nav.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            Self {
                engine,
                session: ScriptedSession::new(scenario),
                recognizer,
                ledger,
                navigations,
            }
        }

        fn tick(&mut self) -> TickReport {
            self.engine.tick(&mut self.session)
        }

        /// Ticks until placed or out of frames, answering every attempt
        /// immediately with `spans`.
        fn run_answering(&mut self, spans: &[&str]) -> Vec<Duration> {
            let mut starts = Vec::new();
            loop {
                let report = self.tick();
                if report.frame.is_none() {
                    return starts;
                }
                if report.submitted.is_some() {
                    starts.push(report.frame.unwrap());
                    self.recognizer.complete_next_with(spans.iter().copied());
                }
            }
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn floor() -> TrackedSurface {
        TrackedSurface::rectangle(
            SurfaceId(7),
            Pose::from_translation(Vec3::new(0.0, 0.0, -1.0)),
            4.0,
            4.0,
        )
    }

    fn pitched_camera() -> Pose {
        Pose::new(
            glam::Quat::from_rotation_x(-60_f32.to_radians()),
            Vec3::new(0.0, 1.5, 0.0),
        )
    }

    #[test]
    fn first_second_without_match_makes_two_attempts() {
        let mut h = Harness::new(Scenario::default());

        let starts = h.run_answering(&["no marker here"]);

        assert_eq!(starts, vec![ms(0), ms(500)]);
        assert_eq!(h.engine.stats().attempts, 2);
        assert_eq!(h.engine.state(), PlacementState::Searching);
        assert_eq!(h.session.buffer_stats().outstanding, 0);
    }

    #[test]
    fn attempt_in_flight_blocks_further_attempts() {
        let mut h = Harness::new(Scenario {
            ticks: 20,
            ..Scenario::default()
        });

        let first = h.tick();
        assert!(first.submitted.is_some());
        for _ in 1..20 {
            let report = h.tick();
            assert_eq!(report.submitted, None);
            assert_eq!(
                report.gate,
                Some(GateDecision::Reject(GateRejection::InFlight))
            );
        }

        assert_eq!(h.engine.state(), PlacementState::Recognizing);
        assert_eq!(h.recognizer.max_in_flight(), 1);
        assert_eq!(h.session.buffer_stats().outstanding, 1);
    }

    #[test]
    fn missing_image_neither_counts_nor_advances_throttle() {
        let mut h = Harness::new(Scenario {
            image_unavailable_ticks: vec![0, 1],
            ..Scenario::default()
        });

        let starts = h.run_answering(&[]);

        assert_eq!(starts, vec![ms(200), ms(700)]);
        assert_eq!(h.engine.stats().acquisition_skips, 2);
        assert_eq!(h.engine.stats().attempts, 2);
    }

    #[test]
    fn frames_without_tracking_are_not_used() {
        let mut h = Harness::new(Scenario {
            not_tracking_ticks: vec![0, 1, 2],
            ..Scenario::default()
        });

        let first = h.tick();
        assert_eq!(
            first.gate,
            Some(GateDecision::Reject(GateRejection::NotTracking))
        );
        let starts = h.run_answering(&[]);
        assert_eq!(starts, vec![ms(300), ms(800)]);
        assert_eq!(h.session.buffer_stats().acquired, 2);
    }

    #[test]
    fn camera_buffers_are_released_on_every_path() {
        let mut h = Harness::new(Scenario {
            ticks: 20,
            ..Scenario::default()
        });

        for tick in 0..20_u32 {
            h.recognizer.set_rejecting(tick == 10);
            let report = h.tick();
            if report.submitted.is_none() {
                continue;
            }
            match tick {
                0 => {
                    h.recognizer.fail_next("blurry frame");
                }
                5 => {
                    h.recognizer.complete_next_with(["Seoul"]);
                }
                15 => {
                    h.recognizer.complete_next_with(["대전 역"]);
                }
                other => panic!("unexpected attempt on tick {other}"),
            }
        }

        let stats = h.engine.stats().clone();
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.recognition_failures, 1);
        assert_eq!(stats.submit_failures, 1);
        assert_eq!(stats.matches, 1);
        assert_eq!(h.engine.state(), PlacementState::Placed);

        let buffers = h.session.buffer_stats();
        assert_eq!(buffers.acquired, 4);
        assert_eq!(buffers.released, 4);
        assert_eq!(buffers.outstanding, 0);
    }

    #[test]
    fn duplicate_match_places_a_single_object() {
        let mut h = Harness::new(Scenario::default());

        let report = h.tick();
        let attempt = report.submitted.unwrap();
        let job = h.recognizer.take_next().unwrap();
        let reply = job.reply.clone();
        job.complete(Ok(vec!["대전".to_string()]));
        reply.send(RecognitionOutcome {
            attempt,
            result: Ok(vec!["대전".to_string()]),
        });

        let report = h.tick();
        assert!(report.placed.is_some());
        h.run_answering(&["대전"]);

        assert_eq!(h.session.anchors_created(), 1);
        assert_eq!(h.engine.scene().node_count(), 1);
        assert_eq!(h.engine.stats().placement_races, 1);
        assert_eq!(h.engine.stats().attempts, 1);
    }

    #[test]
    fn surface_hit_places_on_surface() {
        let mut h = Harness::new(Scenario {
            camera: pitched_camera(),
            surfaces: vec![floor()],
            ..Scenario::default()
        });

        h.run_answering(&["Welcome to", "대전"]);

        let record = *h.engine.placed().unwrap();
        assert_eq!(record.kind, PlacementKind::Surface);
        assert_eq!(record.placed_at, ms(0));
        let node = h.engine.scene().node(record.node).unwrap();
        let position = node.world_pose().translation;
        assert!(position.y.abs() < 1e-4);
        assert!((position.z + 0.866).abs() < 1e-3);
        assert_eq!(h.engine.status().status(), PlacementStatus::SurfacePlaced);
    }

    #[test]
    fn no_surface_floats_behind_the_lens() {
        let mut h = Harness::new(Scenario::default());

        h.run_answering(&["대전"]);

        let record = *h.engine.placed().unwrap();
        assert_eq!(record.kind, PlacementKind::Floating);
        let node = h.engine.scene().node(record.node).unwrap();
        assert!(node
            .world_pose()
            .translation
            .abs_diff_eq(Vec3::new(0.0, 0.0, 0.5), 1e-5));
        assert_eq!(node.model_asset, "mascot.glb");
        assert_eq!(node.anchor.id, record.anchor);
        let live: Vec<_> = h.session.live_anchors().map(|anchor| anchor.id).collect();
        assert_eq!(live, vec![record.anchor]);

        let status = h.engine.status().snapshot();
        assert_eq!(status.status, PlacementStatus::FloatingPlaced);
        assert_eq!(status.message, h.engine.config().status.floating_placed);
    }

    #[test]
    fn placement_uses_camera_of_the_recognized_frame() {
        let mut h = Harness::new(Scenario {
            camera_step: Vec3::new(1.0, 0.0, 0.0),
            ..Scenario::default()
        });

        assert!(h.tick().submitted.is_some());
        h.tick();
        h.tick();
        h.recognizer.complete_next_with(["대전"]);
        let report = h.tick();

        let record = report.placed.unwrap();
        let node = h.engine.scene().node(record.node).unwrap();
        assert!(node
            .world_pose()
            .translation
            .abs_diff_eq(Vec3::new(0.0, 0.0, 0.5), 1e-5));
    }

    #[test]
    fn repeated_taps_collect_once() {
        let mut h = Harness::new(Scenario::default());
        h.run_answering(&["대전"]);
        let node = h.engine.placed().unwrap().node;

        assert_eq!(h.engine.tap(node), TapOutcome::Handled);
        assert_eq!(h.engine.tap(node), TapOutcome::Ignored);
        assert_eq!(h.engine.tap(node), TapOutcome::Ignored);
        assert_eq!(h.engine.tap(NodeId(999)), TapOutcome::Ignored);

        assert_eq!(h.ledger.count(1001), 1);
        assert_eq!(h.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.status().status(), PlacementStatus::Collected);
        assert_eq!(h.engine.stats().taps_handled, 1);
        assert_eq!(h.engine.stats().taps_ignored, 3);
    }

    #[test]
    fn hung_recognition_is_reported_once() {
        let mut config = EngineConfig::default();
        config.throttle.stuck_after_ms = 1000;
        let mut h = Harness::with_config(
            Scenario {
                ticks: 40,
                ..Scenario::default()
            },
            config,
        );

        for tick in 0..30 {
            h.tick();
            let expected = if tick >= 10 {
                PlacementStatus::Stalled
            } else {
                PlacementStatus::Searching
            };
            assert_eq!(h.engine.status().status(), expected, "tick {tick}");
        }
        assert_eq!(h.engine.stats().stalled_attempts, 1);
        assert_eq!(h.engine.stats().attempts, 1);

        h.recognizer.complete_next_with(["대전"]);
        h.tick();
        assert_eq!(h.engine.state(), PlacementState::Placed);
        assert_eq!(
            h.engine.status().status(),
            PlacementStatus::FloatingPlaced
        );
    }

    #[test]
    fn anchor_failure_keeps_searching() {
        let mut h = Harness::new(Scenario {
            refuse_anchors: 1,
            ..Scenario::default()
        });

        let starts = h.run_answering(&["대전"]);

        assert_eq!(starts, vec![ms(0), ms(500)]);
        assert_eq!(h.engine.stats().anchor_failures, 1);
        assert_eq!(h.engine.stats().matches, 2);
        assert_eq!(h.engine.state(), PlacementState::Placed);
        assert_eq!(h.engine.scene().node_count(), 1);
    }

    #[test]
    fn start_configures_session_and_lights_scene() {
        let mut h = Harness::new(Scenario::default());
        h.tick();

        let configured = h.session.configured().unwrap();
        assert_eq!(configured.focus_mode, FocusMode::Auto);
        assert_eq!(h.engine.scene().lights().count(), 1);

        h.engine.start(&mut h.session);
        assert_eq!(h.engine.scene().lights().count(), 1);
    }

    #[test]
    fn teardown_detaches_the_anchor() {
        let mut h = Harness::new(Scenario::default());
        h.run_answering(&["대전"]);
        assert_eq!(h.session.live_anchors().count(), 1);

        let Harness {
            engine,
            mut session,
            ..
        } = h;
        let stats = engine.teardown(&mut session);

        assert_eq!(session.live_anchors().count(), 0);
        assert_eq!(stats.matches, 1);
    }
}
