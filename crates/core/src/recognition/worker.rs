use std::{
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info, warn};

use super::{RecognitionJob, RecognitionService, TextRecognizer};
use crate::{MascotArError, Result};

/// Runs a blocking [`TextRecognizer`] on a background thread.
///
/// Jobs are processed one at a time in submission order. Dropping the worker
/// closes the job channel and joins the thread if it exits within
/// [`SHUTDOWN_GRACE`]. A recognizer still busy after that is detached, so a
/// hung call never blocks the owner.
pub struct RecognitionWorker {
    jobs: Option<Sender<RecognitionJob>>,
    handle: Option<JoinHandle<()>>,
}

/// How long dropping a [`RecognitionWorker`] waits for its thread.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

impl RecognitionWorker {
    pub fn spawn<R: TextRecognizer>(mut recognizer: R) -> Result<Self> {
        let (jobs, rx) = unbounded::<RecognitionJob>();
        let handle = std::thread::Builder::new()
            .name("text-recognition".to_string())
            .spawn(move || {
                info!("recognition worker starting");
                for job in rx {
                    let result = recognizer.recognize(&job.image);
                    if let Err(err) = &result {
                        warn!(attempt = job.attempt.0, %err, "recognizer failed");
                    }
                    job.complete(result);
                }
                info!("recognition worker exiting");
            })?;

        Ok(Self {
            jobs: Some(jobs),
            handle: Some(handle),
        })
    }

    /// Closes the job channel and waits up to `grace` for the thread to
    /// exit. Returns whether it was joined; otherwise it is left detached.
    fn shutdown(&mut self, grace: Duration) -> bool {
        self.jobs.take();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(?grace, "recognizer still busy at shutdown; detaching worker thread");
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        if handle.join().is_err() {
            warn!("recognition worker panicked");
        }
        true
    }
}

impl RecognitionService for RecognitionWorker {
    fn submit(&mut self, job: RecognitionJob) -> Result<()> {
        let jobs = self.jobs.as_ref().ok_or(MascotArError::WorkerDisconnected)?;
        debug!(attempt = job.attempt.0, "submitting image to recognition worker");
        jobs.send(job).map_err(|_| MascotArError::WorkerDisconnected)
    }
}

impl Drop for RecognitionWorker {
    fn drop(&mut self) {
        self.shutdown(SHUTDOWN_GRACE);
    }
}

impl std::fmt::Debug for RecognitionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionWorker")
            .field("running", &self.handle.as_ref().map(|h| !h.is_finished()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{bounded, Receiver};

    use super::*;
    use crate::recognition::{
        AttemptId, CompletionQueue, ScriptedRecognizer, ScriptedResponse,
    };
    use crate::session::ImageView;

    fn job(attempt: u64, queue_tx: &crate::recognition::CompletionSender) -> RecognitionJob {
        RecognitionJob {
            attempt: AttemptId(attempt),
            image: ImageView::new(vec![0_u8; 4], 2, 2, Duration::from_millis(attempt * 100)),
            reply: queue_tx.clone(),
        }
    }

    #[test]
    fn delivers_outcomes_through_the_queue() {
        let recognizer = ScriptedRecognizer::new(vec![
            ScriptedResponse::Spans(vec!["nothing here".to_string()]),
            ScriptedResponse::Error("lens covered".to_string()),
        ]);
        let mut worker = RecognitionWorker::spawn(recognizer).unwrap();
        let (tx, queue) = CompletionQueue::new();

        worker.submit(job(1, &tx)).unwrap();
        worker.submit(job(2, &tx)).unwrap();

        let first = queue.recv_timeout(Duration::from_secs(5)).expect("first outcome");
        let second = queue.recv_timeout(Duration::from_secs(5)).expect("second outcome");

        assert_eq!(first.attempt, AttemptId(1));
        assert_eq!(first.result.unwrap(), vec!["nothing here".to_string()]);
        assert_eq!(second.attempt, AttemptId(2));
        assert!(matches!(
            second.result,
            Err(MascotArError::Recognition(ref msg)) if msg == "lens covered"
        ));
    }

    #[test]
    fn idle_worker_is_joined_on_shutdown() {
        let mut worker = RecognitionWorker::spawn(ScriptedRecognizer::new(Vec::new())).unwrap();
        assert!(worker.shutdown(Duration::from_secs(5)));
        assert!(worker.shutdown(Duration::ZERO));
    }

    /// Blocks every call until the test lets it go.
    struct BlockingRecognizer {
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl TextRecognizer for BlockingRecognizer {
        fn recognize(&mut self, _image: &ImageView) -> Result<Vec<String>> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(Vec::new())
        }
    }

    #[test]
    fn hung_recognizer_does_not_block_drop() {
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let mut worker = RecognitionWorker::spawn(BlockingRecognizer {
            started: started_tx,
            release: release_rx,
        })
        .unwrap();
        let (tx, queue) = CompletionQueue::new();

        worker.submit(job(1, &tx)).unwrap();
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("recognizer started");

        let began = Instant::now();
        drop(worker);
        assert!(began.elapsed() < Duration::from_secs(1));

        // The detached thread still finishes its job once unblocked.
        release_tx.send(()).unwrap();
        let outcome = queue.recv_timeout(Duration::from_secs(5)).expect("late outcome");
        assert_eq!(outcome.attempt, AttemptId(1));
    }
}
