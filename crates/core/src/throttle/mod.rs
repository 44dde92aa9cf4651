use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{session::TrackingState, PlacementState};

/// Why a frame was not used for recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRejection {
    AlreadyPlaced,
    InFlight,
    NotTracking,
    Throttled { remaining: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Reject(GateRejection),
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Decides per frame whether a recognition attempt may start.
///
/// The interval is measured between attempt starts: [`record_attempt`] is
/// called when an attempt begins, not when it completes. Ticks where no
/// image could be acquired never reach `record_attempt` and leave the timer
/// untouched.
///
/// [`record_attempt`]: RecognitionGate::record_attempt
#[derive(Debug, Clone)]
pub struct RecognitionGate {
    min_interval: Duration,
    last_attempt: Option<Duration>,
}

impl RecognitionGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_attempt: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_attempt(&self) -> Option<Duration> {
        self.last_attempt
    }

    pub fn evaluate(
        &self,
        state: PlacementState,
        tracking: TrackingState,
        now: Duration,
    ) -> GateDecision {
        match state {
            PlacementState::Placed => return GateDecision::Reject(GateRejection::AlreadyPlaced),
            PlacementState::Recognizing => return GateDecision::Reject(GateRejection::InFlight),
            PlacementState::Searching => {}
        }

        if tracking != TrackingState::Tracking {
            return GateDecision::Reject(GateRejection::NotTracking);
        }

        if let Some(last) = self.last_attempt {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.min_interval {
                return GateDecision::Reject(GateRejection::Throttled {
                    remaining: self.min_interval - elapsed,
                });
            }
        }

        GateDecision::Pass
    }

    pub fn record_attempt(&mut self, now: Duration) {
        self.last_attempt = Some(now);
    }
}
