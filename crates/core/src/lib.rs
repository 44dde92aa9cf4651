//! Core library for the mascot AR placement engine.
//!
//! The crate watches a tracking session's camera frames for a marker text,
//! anchors a collectible 3D object where the text was seen and reports the
//! first tap on it. Each module owns one concern (geometry, tracking session
//! seams, text recognition, throttling, placement, scene, status) and
//! [`PlacementEngine`] ties them together in a per-frame tick.

pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod placement;
pub mod recognition;
pub mod scene;
pub mod session;
pub mod sim;
pub mod state;
pub mod status;
pub mod throttle;

pub use collection::{CollectionLedger, CollectionSink};
pub use config::{load_config, save_config, EngineConfig};
pub use engine::{EngineStats, PlacementEngine, TickReport};
pub use error::{MascotArError, Result};
pub use geometry::{CameraIntrinsics, Pose, Ray};
pub use placement::{PlacementKind, PlacementResolver, PlacementTarget};
pub use recognition::{
    DetectionResult, ManualRecognizer, RecognitionService, RecognitionWorker, ScriptedRecognizer,
    TextRecognizer,
};
pub use scene::{NodeId, SceneGraph, TapOutcome};
pub use session::{Frame, ImageBuffer, ImageView, TrackingSession, TrackingState};
pub use sim::{run_scenario, Scenario, ScenarioReport, ScriptedSession};
pub use state::{PlacementState, PlacementStateMachine};
pub use status::{PlacementStatus, StatusReader};
