use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use std::thread;

type Worker = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Final verdict of a pipeline run.
///
/// Cancellation is a first-class outcome, distinct from success; any
/// worker error makes the whole run a failure, even when cancellation
/// was also requested and other workers finished normally.
#[derive(Debug)]
pub enum Outcome {
    /// Every worker ran to completion
    Completed,
    /// Cancellation was requested and no worker failed
    Canceled,
    /// One or more workers failed; every collected error is kept
    Failed(Vec<PipelineError>),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    /// Errors from a failed run, empty otherwise
    pub fn errors(&self) -> &[PipelineError] {
        match self {
            Outcome::Failed(errors) => errors,
            _ => &[],
        }
    }
}

/// Runs a source and a set of stages as parallel worker threads.
///
/// The topology is declared up front by registering one closure per
/// worker; [`execute`](Self::execute) spawns them all, joins them all
/// (no detached work survives the call), and folds their results into an
/// [`Outcome`].
pub struct Pipeline {
    workers: Vec<(String, Worker)>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            workers: Vec::new(),
            cancel,
        }
    }

    /// Register a worker. Typically `move || source.run(items)` or
    /// `move || stage.run()`.
    pub fn worker(
        mut self,
        name: impl Into<String>,
        work: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Self {
        self.workers.push((name.into(), Box::new(work)));
        self
    }

    /// Spawn every worker, wait for all of them, and report the
    /// aggregate outcome.
    ///
    /// Errors from the run itself come back inside [`Outcome::Failed`];
    /// the outer `Err` is reserved for a misconfigured pipeline.
    pub fn execute(self) -> Result<Outcome> {
        if self.workers.is_empty() {
            return Err(PipelineError::NoWorkers);
        }

        tracing::info!(workers = self.workers.len(), "pipeline starting");

        let mut errors = Vec::new();
        let mut handles = Vec::with_capacity(self.workers.len());
        for (name, work) in self.workers {
            match thread::Builder::new().name(name.clone()).spawn(work) {
                Ok(handle) => handles.push((name, handle)),
                Err(_) => {
                    // Already-spawned workers must still be joined; the
                    // canceled token unblocks their bounded polls.
                    self.cancel.cancel();
                    errors.push(PipelineError::Spawn(name));
                    break;
                }
            }
        }

        for (name, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(worker = %name, error = %err, "worker failed");
                    errors.push(err);
                }
                Err(_) => {
                    tracing::error!(worker = %name, "worker panicked");
                    errors.push(PipelineError::WorkerPanic(name));
                }
            }
        }

        let outcome = if !errors.is_empty() {
            Outcome::Failed(errors)
        } else if self.cancel.is_canceled() {
            Outcome::Canceled
        } else {
            Outcome::Completed
        };

        tracing::info!(
            outcome = match &outcome {
                Outcome::Completed => "completed",
                Outcome::Canceled => "canceled",
                Outcome::Failed(_) => "failed",
            },
            "pipeline finished"
        );
        Ok(outcome)
    }
}
