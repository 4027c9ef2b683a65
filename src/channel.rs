use crate::error::{PipelineError, Result};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default interval between partition scans while waiting on a full or
/// empty channel
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Construction-time configuration for a [`PartitionedChannel`]
///
/// The topology is fixed once the channel exists; there is no runtime
/// reconfiguration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Number of independent bounded queues backing the channel
    pub partitions: usize,
    /// Capacity of each partition
    pub capacity: usize,
    /// Sleep interval between scans in `try_add_any` / `try_take_any`
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            capacity: 64,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ChannelConfig {
    /// Config with the given topology and the default poll interval
    pub fn new(partitions: usize, capacity: usize) -> Self {
        Self {
            partitions,
            capacity,
            ..Self::default()
        }
    }

    /// Override the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Result of an add attempt on a channel that was not closed
#[derive(Debug)]
pub enum AddOutcome<T> {
    /// The item was placed into the partition at this index
    Accepted(usize),
    /// Every partition stayed full for the whole timeout; the item is
    /// handed back so the caller can retry
    Full(T),
}

/// One bounded queue of the channel, with its own completion flag
struct Partition<T> {
    queue: ArrayQueue<T>,
    complete: AtomicBool,
}

struct Shared<T> {
    partitions: Vec<Partition<T>>,
    /// Rotating scan offsets so neither adds nor takes favor partition 0
    add_cursor: AtomicUsize,
    take_cursor: AtomicUsize,
    poll_interval: Duration,
}

/// A fixed set of independent bounded queues acting as one logical
/// channel.
///
/// Spreading items over several lock-free queues keeps producers and
/// consumers contending on one partition at a time instead of a single
/// shared lock. The price is ordering: items are FIFO within a
/// partition, but no order is guaranteed across partitions.
///
/// Producers call [`complete_adding`](Self::complete_adding) exactly
/// once when done; consumers keep draining until
/// [`is_fully_complete`](Self::is_fully_complete) turns true, which is
/// their exit signal.
pub struct PartitionedChannel<T: Send> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> Clone for PartitionedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send> PartitionedChannel<T> {
    /// Create a channel with the given partition count and per-partition
    /// capacity, using the default poll interval
    pub fn new(partitions: usize, capacity: usize) -> Result<Self> {
        Self::with_config(ChannelConfig::new(partitions, capacity))
    }

    /// Create a channel from a full config
    pub fn with_config(config: ChannelConfig) -> Result<Self> {
        if config.partitions == 0 {
            return Err(PipelineError::Config(
                "channel needs at least one partition".into(),
            ));
        }
        if config.capacity == 0 {
            return Err(PipelineError::Config(
                "partition capacity must be non-zero".into(),
            ));
        }

        let partitions = (0..config.partitions)
            .map(|_| Partition {
                queue: ArrayQueue::new(config.capacity),
                complete: AtomicBool::new(false),
            })
            .collect();

        Ok(Self {
            shared: Arc::new(Shared {
                partitions,
                add_cursor: AtomicUsize::new(0),
                take_cursor: AtomicUsize::new(0),
                poll_interval: config.poll_interval,
            }),
        })
    }

    /// Try to place `item` into any partition with free capacity.
    ///
    /// Partitions are scanned from a rotating offset so no single
    /// partition is starved. If every partition stays full until the
    /// timeout elapses, the item is returned in [`AddOutcome::Full`];
    /// that is transient backpressure and the caller should retry.
    ///
    /// Adding to a channel whose producer already called
    /// [`complete_adding`](Self::complete_adding) is a caller error and
    /// fails with [`PipelineError::ChannelClosed`].
    pub fn try_add_any(&self, mut item: T, timeout: Duration) -> Result<AddOutcome<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_adding_complete() {
                return Err(PipelineError::ChannelClosed);
            }

            let offset = self.shared.add_cursor.fetch_add(1, Ordering::Relaxed);
            let count = self.shared.partitions.len();
            for i in 0..count {
                let index = (offset + i) % count;
                match self.shared.partitions[index].queue.push(item) {
                    Ok(()) => return Ok(AddOutcome::Accepted(index)),
                    Err(rejected) => item = rejected,
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(AddOutcome::Full(item));
            }
            thread::sleep(self.shared.poll_interval.min(deadline - now));
        }
    }

    /// Try to take one item from any non-empty partition.
    ///
    /// Scans from a rotating offset; if every partition is empty, waits
    /// up to `timeout` and returns `None`. On a fully complete, drained
    /// channel it returns `None` immediately without waiting, which is
    /// the consumer's signal to stop.
    pub fn try_take_any(&self, timeout: Duration) -> Option<(T, usize)> {
        let deadline = Instant::now() + timeout;
        loop {
            let offset = self.shared.take_cursor.fetch_add(1, Ordering::Relaxed);
            let count = self.shared.partitions.len();
            for i in 0..count {
                let index = (offset + i) % count;
                if let Some(item) = self.shared.partitions[index].queue.pop() {
                    return Some((item, index));
                }
            }

            if self.is_fully_complete() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(self.shared.poll_interval.min(deadline - now));
        }
    }

    /// Mark every partition as closed for adding. Idempotent.
    ///
    /// Buffered items remain takeable; once they drain,
    /// [`is_fully_complete`](Self::is_fully_complete) becomes true
    /// permanently.
    pub fn complete_adding(&self) {
        let mut newly_closed = false;
        for partition in &self.shared.partitions {
            newly_closed |= !partition.complete.swap(true, Ordering::Release);
        }
        if newly_closed {
            tracing::debug!(
                remaining = self.len(),
                "channel closed for adding"
            );
        }
    }

    /// True once `complete_adding` was called (items may still be
    /// buffered)
    pub fn is_adding_complete(&self) -> bool {
        self.shared
            .partitions
            .iter()
            .all(|p| p.complete.load(Ordering::Acquire))
    }

    /// True once every partition is both closed for adding and empty
    pub fn is_fully_complete(&self) -> bool {
        self.shared
            .partitions
            .iter()
            .all(|p| p.complete.load(Ordering::Acquire) && p.queue.is_empty())
    }

    /// Total number of buffered items across all partitions
    pub fn len(&self) -> usize {
        self.shared.partitions.iter().map(|p| p.queue.len()).sum()
    }

    /// Whether every partition is currently empty
    pub fn is_empty(&self) -> bool {
        self.shared.partitions.iter().all(|p| p.queue.is_empty())
    }

    /// Number of partitions
    pub fn num_partitions(&self) -> usize {
        self.shared.partitions.len()
    }

    /// Capacity of each partition
    pub fn partition_capacity(&self) -> usize {
        self.shared.partitions[0].queue.capacity()
    }

    /// Number of items currently buffered in one partition
    pub fn partition_len(&self, index: usize) -> Option<usize> {
        self.shared.partitions.get(index).map(|p| p.queue.len())
    }
}
