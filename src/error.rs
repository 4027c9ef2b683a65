use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur during pipeline execution
///
/// Backpressure timeouts are deliberately absent: an add or take that
/// runs out of time is a transient condition encoded in the return value
/// of the channel operation, not an error.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Add attempted after `complete_adding` was called
    #[error("channel is closed for adding")]
    ChannelClosed,

    /// Invalid channel or pipeline configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A stage's transform or sink action failed for an item
    #[error("stage `{stage}` failed: {reason}")]
    StageFailed { stage: String, reason: String },

    /// Failure raised inside a user-supplied transform
    #[error("transform error: {0}")]
    Transform(String),

    /// A worker thread could not be spawned
    #[error("failed to spawn worker `{0}`")]
    Spawn(String),

    /// A worker thread panicked before returning a result
    #[error("worker `{0}` panicked")]
    WorkerPanic(String),

    /// Pipeline was executed with no workers registered
    #[error("cannot execute a pipeline with no workers")]
    NoWorkers,
}
