//! Asynchronous text recognition boundary.
//!
//! A [`RecognitionService`] accepts one [`RecognitionJob`] at a time and
//! posts exactly one [`RecognitionOutcome`] through the job's
//! [`CompletionSender`]. Outcomes are queued, never applied from the
//! service's own thread: the engine drains the [`CompletionQueue`] on its
//! tick.

mod manual;
mod worker;

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{session::ImageView, Result};

pub use manual::{ManualRecognizer, ManualRecognizerHandle, ScriptedRecognizer, ScriptedResponse};
pub use worker::RecognitionWorker;

/// Sequence number of a recognition attempt within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

/// Result of one recognition call as delivered back to the engine.
#[derive(Debug)]
pub struct RecognitionOutcome {
    pub attempt: AttemptId,
    pub result: Result<Vec<String>>,
}

/// Recognized text from one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub recognized_text: String,
    pub source_frame_timestamp: Duration,
}

impl DetectionResult {
    pub fn from_spans(spans: &[String], source_frame_timestamp: Duration) -> Self {
        Self {
            recognized_text: spans.join("\n"),
            source_frame_timestamp,
        }
    }

    /// Case-sensitive substring match against the full recognized text.
    pub fn contains_marker(&self, marker: &str) -> bool {
        !marker.is_empty() && self.recognized_text.contains(marker)
    }
}

/// Posts recognition outcomes back to the engine's queue.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: Sender<RecognitionOutcome>,
}

impl CompletionSender {
    /// Queues an outcome. A closed queue means the session is gone; the
    /// outcome is dropped.
    pub fn send(&self, outcome: RecognitionOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!("completion queue closed; dropping recognition outcome");
        }
    }
}

/// Receiving end owned by the engine.
#[derive(Debug)]
pub struct CompletionQueue {
    rx: Receiver<RecognitionOutcome>,
}

impl CompletionQueue {
    pub fn new() -> (CompletionSender, Self) {
        let (tx, rx) = unbounded();
        (CompletionSender { tx }, Self { rx })
    }

    /// Outcomes that have arrived since the last drain, in arrival order.
    pub fn drain(&self) -> Vec<RecognitionOutcome> {
        self.rx.try_iter().collect()
    }

    /// Blocks until an outcome arrives or `timeout` elapses.
    #[cfg(test)]
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<RecognitionOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// One image submitted for recognition.
#[derive(Debug)]
pub struct RecognitionJob {
    pub attempt: AttemptId,
    pub image: ImageView,
    pub reply: CompletionSender,
}

impl RecognitionJob {
    /// Posts the outcome for this job.
    pub fn complete(self, result: Result<Vec<String>>) {
        self.reply.send(RecognitionOutcome {
            attempt: self.attempt,
            result,
        });
    }
}

/// Accepts recognition jobs without blocking the caller.
pub trait RecognitionService {
    /// Starts recognition. An error means the job was not accepted and no
    /// outcome will arrive for it.
    fn submit(&mut self, job: RecognitionJob) -> Result<()>;
}

/// Blocking text recognizer, run out of line by [`RecognitionWorker`].
pub trait TextRecognizer: Send + 'static {
    fn recognize(&mut self, image: &ImageView) -> Result<Vec<String>>;
}
