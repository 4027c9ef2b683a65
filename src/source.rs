use crate::cancel::CancelToken;
use crate::channel::{AddOutcome, PartitionedChannel};
use crate::error::Result;
use crate::stage::{CompletionGuard, DEFAULT_POLL_TIMEOUT};
use std::time::Duration;

/// Feeds an external finite sequence into the first channel of a
/// pipeline.
///
/// Each item is added with a bounded-timeout attempt, retried until it
/// is accepted or cancellation fires. Items not yet emitted when
/// cancellation is requested are simply never produced. On either exit
/// path the output channel is closed for adding exactly once.
pub struct Source<T: Send> {
    name: String,
    output: PartitionedChannel<T>,
    cancel: CancelToken,
    retry_timeout: Duration,
}

impl<T: Send + 'static> Source<T> {
    pub fn new(
        name: impl Into<String>,
        output: PartitionedChannel<T>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            name: name.into(),
            output,
            cancel,
            retry_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Override the per-attempt backpressure retry timeout.
    ///
    /// Retries repeat indefinitely at this granularity; the bound exists
    /// so cancellation is re-checked between attempts, not to give up on
    /// a slow consumer.
    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// Emit the whole sequence, then close the channel for adding.
    ///
    /// The channel is closed even if the work sequence panics mid-
    /// iteration, so downstream stages are never left waiting on a
    /// producer that died. Consumes the source: a work sequence is
    /// generated at most once.
    pub fn run(mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        tracing::debug!(source = %self.name, "source started");

        let mut guard = CompletionGuard::new(Some(self.output.clone()), self.cancel.clone());
        let result = self.emit(items);
        guard.clean_exit = result.is_ok();

        match &result {
            Ok(()) if self.cancel.is_canceled() => {
                tracing::debug!(source = %self.name, "source stopped by cancellation")
            }
            Ok(()) => tracing::debug!(source = %self.name, "source exhausted"),
            Err(err) => tracing::error!(source = %self.name, error = %err, "source aborted"),
        }
        result
    }

    fn emit(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        for item in items {
            if self.cancel.is_canceled() {
                return Ok(());
            }

            let mut pending = item;
            loop {
                match self.output.try_add_any(pending, self.retry_timeout)? {
                    AddOutcome::Accepted(_) => break,
                    AddOutcome::Full(rejected) => {
                        if self.cancel.is_canceled() {
                            return Ok(());
                        }
                        pending = rejected;
                    }
                }
            }
        }
        Ok(())
    }
}
