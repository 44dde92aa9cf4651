use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{AttemptId, RecognitionJob, RecognitionService, TextRecognizer};
use crate::{session::ImageView, MascotArError, Result};

/// Recognition service whose jobs wait until the holder of a
/// [`ManualRecognizerHandle`] completes them. Used for deterministic
/// replays where latency is measured in ticks.
#[derive(Debug, Clone, Default)]
pub struct ManualRecognizer {
    shared: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    pending: VecDeque<RecognitionJob>,
    submitted: usize,
    max_in_flight: usize,
    rejecting: bool,
}

impl ManualRecognizer {
    pub fn new() -> (Self, ManualRecognizerHandle) {
        let service = Self::default();
        let handle = ManualRecognizerHandle {
            shared: service.shared.clone(),
        };
        (service, handle)
    }
}

impl RecognitionService for ManualRecognizer {
    fn submit(&mut self, job: RecognitionJob) -> Result<()> {
        let mut state = self.shared.lock();
        if state.rejecting {
            return Err(MascotArError::WorkerDisconnected);
        }
        state.submitted += 1;
        state.pending.push_back(job);
        state.max_in_flight = state.max_in_flight.max(state.pending.len());
        Ok(())
    }
}

/// Control side of a [`ManualRecognizer`].
#[derive(Debug, Clone)]
pub struct ManualRecognizerHandle {
    shared: Arc<Mutex<ManualState>>,
}

impl ManualRecognizerHandle {
    /// Jobs submitted and not yet completed.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Total jobs accepted so far.
    pub fn submitted(&self) -> usize {
        self.shared.lock().submitted
    }

    /// Largest number of jobs that were pending at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.shared.lock().max_in_flight
    }

    /// Makes further submissions fail, as if the service had gone away.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.shared.lock().rejecting = rejecting;
    }

    /// Removes the oldest pending job without completing it.
    pub fn take_next(&self) -> Option<RecognitionJob> {
        self.shared.lock().pending.pop_front()
    }

    /// Completes the oldest pending job with `result`.
    pub fn complete_next(&self, result: Result<Vec<String>>) -> Option<AttemptId> {
        let job = self.take_next()?;
        let attempt = job.attempt;
        job.complete(result);
        Some(attempt)
    }

    pub fn complete_next_with<I, S>(&self, spans: I) -> Option<AttemptId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.complete_next(Ok(spans.into_iter().map(Into::into).collect()))
    }

    pub fn fail_next(&self, reason: impl Into<String>) -> Option<AttemptId> {
        self.complete_next(Err(MascotArError::Recognition(reason.into())))
    }
}

/// One canned recognizer answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedResponse {
    Spans(Vec<String>),
    Error(String),
}

impl ScriptedResponse {
    pub fn into_result(self) -> Result<Vec<String>> {
        match self {
            Self::Spans(spans) => Ok(spans),
            Self::Error(reason) => Err(MascotArError::Recognition(reason)),
        }
    }
}

/// [`TextRecognizer`] that answers from a script, then recognizes nothing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRecognizer {
    responses: VecDeque<ScriptedResponse>,
}

impl ScriptedRecognizer {
    pub fn new(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
        }
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&mut self, image: &ImageView) -> Result<Vec<String>> {
        if image.pixels().is_empty() {
            return Err(MascotArError::InvalidInput("empty camera image"));
        }
        self.responses
            .pop_front()
            .map_or_else(|| Ok(Vec::new()), ScriptedResponse::into_result)
    }
}
