//! Session-scoped placement state.
//!
//! One explicit value replaces independent "placed", "processing" and
//! "last attempt" flags. The in-flight attempt lives inside the
//! `Recognizing` phase together with the image buffer it owns, so leaving
//! that phase by any route drops (and releases) the buffer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    placement::PlacementKind,
    recognition::AttemptId,
    scene::NodeId,
    session::{AnchorId, CameraSnapshot, ImageBuffer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementState {
    Searching,
    Recognizing,
    Placed,
}

/// A recognition call that has started and not yet completed.
#[derive(Debug)]
pub struct InFlightAttempt {
    pub attempt: AttemptId,
    /// Camera of the frame whose image was submitted.
    pub camera: CameraSnapshot,
    pub source_timestamp: Duration,
    pub started_at: Duration,
    pub(crate) stall_reported: bool,
    image: ImageBuffer,
}

impl InFlightAttempt {
    pub fn new(
        attempt: AttemptId,
        camera: CameraSnapshot,
        image: ImageBuffer,
        started_at: Duration,
    ) -> Self {
        Self {
            attempt,
            camera,
            source_timestamp: image.view().timestamp(),
            started_at,
            stall_reported: false,
            image,
        }
    }

    pub fn image(&self) -> &ImageBuffer {
        &self.image
    }
}

/// What was placed, recorded when the machine latches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacedRecord {
    pub node: NodeId,
    pub anchor: AnchorId,
    pub kind: PlacementKind,
    pub placed_at: Duration,
}

/// A second placement lost the check-and-set.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("object already placed as node {existing:?}")]
pub struct PlacementRace {
    pub existing: NodeId,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Searching,
    Recognizing(InFlightAttempt),
    Placed(PlacedRecord),
}

/// SEARCHING -> RECOGNIZING -> (SEARCHING | PLACED); PLACED is terminal.
#[derive(Debug, Default)]
pub struct PlacementStateMachine {
    phase: Phase,
}

impl PlacementStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlacementState {
        match self.phase {
            Phase::Searching => PlacementState::Searching,
            Phase::Recognizing(_) => PlacementState::Recognizing,
            Phase::Placed(_) => PlacementState::Placed,
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self.phase, Phase::Placed(_))
    }

    pub fn placed(&self) -> Option<&PlacedRecord> {
        match &self.phase {
            Phase::Placed(record) => Some(record),
            _ => None,
        }
    }

    pub fn in_flight(&self) -> Option<&InFlightAttempt> {
        match &self.phase {
            Phase::Recognizing(attempt) => Some(attempt),
            _ => None,
        }
    }

    pub(crate) fn in_flight_mut(&mut self) -> Option<&mut InFlightAttempt> {
        match &mut self.phase {
            Phase::Recognizing(attempt) => Some(attempt),
            _ => None,
        }
    }

    /// SEARCHING -> RECOGNIZING. Any other state hands the attempt back.
    pub fn begin_recognition(
        &mut self,
        attempt: InFlightAttempt,
    ) -> std::result::Result<(), InFlightAttempt> {
        match self.phase {
            Phase::Searching => {
                self.phase = Phase::Recognizing(attempt);
                Ok(())
            }
            _ => Err(attempt),
        }
    }

    /// RECOGNIZING -> SEARCHING for the matching attempt, returning it.
    ///
    /// Outcomes for any other attempt (late duplicates, completions after
    /// placement) leave the state alone and return `None`.
    pub fn finish_recognition(&mut self, attempt: AttemptId) -> Option<InFlightAttempt> {
        match &self.phase {
            Phase::Recognizing(current) if current.attempt == attempt => {}
            _ => return None,
        }
        match std::mem::take(&mut self.phase) {
            Phase::Recognizing(current) => Some(current),
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Check-and-set into PLACED. Only the first caller wins.
    pub fn latch_placed(&mut self, record: PlacedRecord) -> std::result::Result<(), PlacementRace> {
        if let Phase::Placed(existing) = &self.phase {
            return Err(PlacementRace {
                existing: existing.node,
            });
        }
        self.phase = Phase::Placed(record);
        Ok(())
    }
}
