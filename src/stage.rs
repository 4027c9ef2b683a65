use crate::cancel::CancelToken;
use crate::channel::{AddOutcome, PartitionedChannel};
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use std::time::{Duration, Instant};

/// Default bound on a single take or publish attempt.
///
/// Every blocking wait in a stage is capped by this timeout, so a
/// cancellation request is observed within one interval even when no
/// items are flowing.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Where a stage sends its results
enum Downstream<I, O: Send> {
    /// Transform each item and publish it to the next channel
    Channel {
        transform: Box<dyn FnMut(I) -> Result<O> + Send>,
        output: PartitionedChannel<O>,
    },
    /// Terminal stage: hand each item to a side-effecting sink
    Sink(Box<dyn FnMut(I) -> Result<()> + Send>),
}

/// Cleanup that must run even when user code panics mid-item.
///
/// Dropping the guard closes the downstream channel (if any) so later
/// stages never block on a channel whose producer died, and cancels the
/// pipeline unless the worker exited cleanly. Unwinding out of a
/// transform, sink, or work sequence hits this drop before the worker
/// thread dies.
pub(crate) struct CompletionGuard<O: Send> {
    pub(crate) output: Option<PartitionedChannel<O>>,
    pub(crate) cancel: CancelToken,
    pub(crate) clean_exit: bool,
}

impl<O: Send> CompletionGuard<O> {
    pub(crate) fn new(output: Option<PartitionedChannel<O>>, cancel: CancelToken) -> Self {
        Self {
            output,
            cancel,
            clean_exit: false,
        }
    }
}

impl<O: Send> Drop for CompletionGuard<O> {
    fn drop(&mut self) {
        if let Some(output) = &self.output {
            output.complete_adding();
        }
        if !self.clean_exit {
            self.cancel.cancel();
        }
    }
}

/// One unit of work in the pipeline.
///
/// A stage is the sole consumer of its input channel and, unless it is
/// terminal, the sole producer into its output channel. It loops until
/// the input is fully complete or cancellation is requested, taking one
/// item per iteration with a bounded timeout.
///
/// [`run`](Self::run) consumes the stage, so a stage can never execute
/// two loops concurrently or be reused.
pub struct Stage<I: Send, O: Send = ()> {
    name: String,
    input: PartitionedChannel<I>,
    downstream: Downstream<I, O>,
    cancel: CancelToken,
    poll_timeout: Duration,
    metrics: StageMetrics,
}

impl<I: Send + 'static, O: Send + 'static> Stage<I, O> {
    /// A transforming stage that publishes into `output`
    pub fn new(
        name: impl Into<String>,
        input: PartitionedChannel<I>,
        output: PartitionedChannel<O>,
        transform: impl FnMut(I) -> Result<O> + Send + 'static,
        cancel: CancelToken,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            downstream: Downstream::Channel {
                transform: Box::new(transform),
                output,
            },
            cancel,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            metrics: StageMetrics::new(),
        }
    }

    /// Override the per-attempt poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Handle to this stage's metrics; stays live after `run` consumes
    /// the stage
    pub fn metrics(&self) -> StageMetrics {
        self.metrics.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the stage until its input is fully complete, cancellation
    /// fires, or an item fails.
    ///
    /// Whatever the exit path — normal, error, or a panic unwinding out
    /// of the transform — the downstream channel (if any) is closed for
    /// adding before the thread dies, so the next stage never blocks
    /// forever. A failure or panic also cancels the shared token: a dead
    /// stage is fatal to the whole pipeline.
    pub fn run(mut self) -> Result<()> {
        tracing::debug!(stage = %self.name, "stage started");

        let output = match &self.downstream {
            Downstream::Channel { output, .. } => Some(output.clone()),
            Downstream::Sink(_) => None,
        };
        let mut guard = CompletionGuard::new(output, self.cancel.clone());

        let result = self.pump();
        guard.clean_exit = result.is_ok();

        match &result {
            Ok(()) => tracing::debug!(
                stage = %self.name,
                processed = self.metrics.total_processed(),
                "stage finished"
            ),
            Err(err) => tracing::error!(stage = %self.name, error = %err, "stage aborted"),
        }
        result
    }

    fn pump(&mut self) -> Result<()> {
        while !(self.input.is_fully_complete() || self.cancel.is_canceled()) {
            match self.input.try_take_any(self.poll_timeout) {
                Some((item, _)) => self.process(item)?,
                None => self.metrics.record_idle_poll(),
            }
        }

        if self.cancel.is_canceled() {
            tracing::debug!(stage = %self.name, "cancellation observed, draining stopped");
        }
        Ok(())
    }

    fn process(&mut self, item: I) -> Result<()> {
        let started = Instant::now();

        match &mut self.downstream {
            Downstream::Channel { transform, output } => {
                let mut produced = transform(item).map_err(|err| PipelineError::StageFailed {
                    stage: self.name.clone(),
                    reason: err.to_string(),
                })?;

                // Backpressure point: keep retrying bounded adds until
                // the item lands or cancellation fires. A canceled
                // in-flight item is dropped, which the delivery contract
                // allows.
                loop {
                    let attempt = output
                        .try_add_any(produced, self.poll_timeout)
                        .map_err(|err| PipelineError::StageFailed {
                            stage: self.name.clone(),
                            reason: err.to_string(),
                        })?;
                    match attempt {
                        AddOutcome::Accepted(_) => break,
                        AddOutcome::Full(rejected) => {
                            self.metrics.record_publish_retry();
                            if self.cancel.is_canceled() {
                                return Ok(());
                            }
                            produced = rejected;
                        }
                    }
                }
            }
            Downstream::Sink(sink) => {
                sink(item).map_err(|err| PipelineError::StageFailed {
                    stage: self.name.clone(),
                    reason: err.to_string(),
                })?;
            }
        }

        self.metrics.record_latency(started.elapsed());
        self.metrics.record_processed();
        Ok(())
    }
}

impl<I: Send + 'static> Stage<I, ()> {
    /// A terminal stage that consumes items with a sink action instead
    /// of publishing downstream
    pub fn sink(
        name: impl Into<String>,
        input: PartitionedChannel<I>,
        action: impl FnMut(I) -> Result<()> + Send + 'static,
        cancel: CancelToken,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            downstream: Downstream::Sink(Box::new(action)),
            cancel,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            metrics: StageMetrics::new(),
        }
    }
}
