//! A multi-stage concurrent pipeline over partitioned bounded channels.
//!
//! Items flow strictly downstream: a source feeds the first channel,
//! each stage takes from its input channel, transforms, and publishes to
//! its output channel, and the terminal stage hands results to a sink
//! action. Each channel is a fixed array of independent lock-free
//! bounded queues (crossbeam `ArrayQueue`s), so workers contend on one
//! partition at a time instead of a single shared lock.
//!
//! # Features
//!
//! - Partitioned bounded channels with rotating add/take scan offsets
//! - Backpressure via bounded capacity and bounded-timeout retries
//! - Completion propagation: each channel is closed for adding exactly
//!   once when its producer is done, drained items and all
//! - Cooperative cancellation checked at every poll iteration
//! - Three-way run outcome: completed, canceled, or failed with every
//!   worker error collected
//! - Per-stage metrics: throughput, publish retries, latency percentiles
//!
//! # Example
//!
//! ```ignore
//! use partitioned_pipeline::{CancelToken, PartitionedChannel, Pipeline, Source, Stage};
//!
//! let cancel = CancelToken::new();
//! let ints = PartitionedChannel::new(4, 10)?;
//! let scaled = PartitionedChannel::new(4, 10)?;
//!
//! let source = Source::new("ints", ints.clone(), cancel.clone());
//! let scale = Stage::new("scale", ints, scaled.clone(), |n: i64| Ok(n as f64 * 0.97), cancel.clone());
//! let print = Stage::sink("print", scaled, |v| { println!("{v}"); Ok(()) }, cancel.clone());
//!
//! let outcome = Pipeline::new(cancel)
//!     .worker("source", move || source.run(0..40))
//!     .worker("scale", move || scale.run())
//!     .worker("print", move || print.run())
//!     .execute()?;
//! assert!(outcome.is_completed());
//! ```

pub mod cancel;
pub mod channel;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod stage;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use channel::{AddOutcome, ChannelConfig, PartitionedChannel, DEFAULT_POLL_INTERVAL};
pub use error::{PipelineError, Result};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{Outcome, Pipeline};
pub use source::Source;
pub use stage::{Stage, DEFAULT_POLL_TIMEOUT};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
