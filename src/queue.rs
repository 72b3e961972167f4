//! In-memory prioritized message queue.
//!
//! Messages live in lanes, one FIFO per priority level; lane 0 is the most
//! urgent. Every lane mutation happens under one coarse mutex, while the total
//! count is an atomic so producers can check for room without taking the lock.
//!
//! Capacity is a soft limit: [`PrioritizedQueue::push`] always enqueues, and
//! only [`PrioritizedQueue::push_blocking`] waits for room.

use crate::config::QueueSettings;
use crate::error::{Error, Result};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// First backoff step of a blocking push.
const INITIAL_PUSH_BACKOFF: Duration = Duration::from_millis(1);
/// Backoff never grows past this.
const MAX_PUSH_BACKOFF: Duration = Duration::from_millis(64);

/// Lane that receives every message admitted by [`PrioritizedQueue::push_blocking`].
pub const TOP_PRIORITY_LANE: usize = 0;

/// Result of a blocking push.
#[derive(Debug, PartialEq, Eq)]
pub enum Pushed<M> {
    /// The message is in the queue.
    Accepted,
    /// The queue stayed full for the whole wait; the message is handed back.
    TimedOut(M),
}

impl<M> Pushed<M> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Pushed::Accepted)
    }
}

/// A bounded, multi-lane FIFO queue with one consumer and many producers.
pub struct PrioritizedQueue<M> {
    name: String,
    lanes: Mutex<Vec<VecDeque<M>>>,
    size: AtomicUsize,
    capacity: AtomicUsize,
}

impl<M: Send> PrioritizedQueue<M> {
    pub fn new(name: impl Into<String>, settings: QueueSettings) -> Self {
        let queue = Self {
            name: name.into(),
            lanes: Mutex::new(Vec::new()),
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
        };
        queue.resize(settings.capacity(), settings.lane_count());
        queue
    }

    /// Name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reconfigure capacity and lane count.
    ///
    /// Growing appends empty lanes. Shrinking drops trailing lanes beyond
    /// `lane_count` only while they are empty, so a non-empty lane survives
    /// even if that leaves more lanes than requested.
    pub fn initialize(&self, capacity: usize, lane_count: usize) -> Result<()> {
        let settings = QueueSettings::new(capacity, lane_count)?;
        self.resize(settings.capacity(), settings.lane_count());
        Ok(())
    }

    fn resize(&self, capacity: usize, lane_count: usize) {
        let mut lanes = self.lock_lanes();
        while lanes.len() < lane_count {
            lanes.push(VecDeque::new());
        }
        while lanes.len() > lane_count && lanes.last().is_some_and(VecDeque::is_empty) {
            lanes.pop();
        }
        self.capacity.store(capacity, Ordering::Release);
        info!(
            queue = %self.name,
            capacity,
            lanes = lanes.len(),
            requested_lanes = lane_count,
            "queue initialized"
        );
    }

    /// Current number of lanes.
    pub fn lane_count(&self) -> usize {
        self.lock_lanes().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Whether there is room for another message.
    ///
    /// Advisory only: concurrent producers may race past the limit.
    pub fn can_push(&self) -> bool {
        self.size() < self.capacity()
    }

    /// Append `message` to the tail of `lane`. Never checks capacity.
    pub fn push(&self, lane: usize, message: M) -> Result<()> {
        {
            let mut lanes = self.lock_lanes();
            let lanes_len = lanes.len();
            let target = lanes.get_mut(lane).ok_or(Error::InvalidPriority {
                priority: lane,
                lanes: lanes_len,
            })?;
            target.push_back(message);
            self.size.fetch_add(1, Ordering::AcqRel);
        }
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", "push"),
            ],
        );
        Ok(())
    }

    /// Wait for room, then enqueue into [`TOP_PRIORITY_LANE`].
    ///
    /// `lane` is validated but does not pick the target lane: a producer that
    /// had to wait out backpressure is promoted to the top lane. `max_wait` of
    /// `None` waits forever. On timeout the queue is untouched and the message
    /// is returned in [`Pushed::TimedOut`].
    pub async fn push_blocking(
        &self,
        lane: usize,
        message: M,
        max_wait: Option<Duration>,
    ) -> Result<Pushed<M>> {
        self.wait_and_push(lane, message, max_wait, None).await
    }

    /// Push into `lane` while there is room; otherwise fall back to
    /// [`push_blocking`](Self::push_blocking), which waits and promotes.
    pub async fn offer(
        &self,
        lane: usize,
        message: M,
        max_wait: Option<Duration>,
    ) -> Result<Pushed<M>> {
        if self.can_push() {
            self.push(lane, message)?;
            return Ok(Pushed::Accepted);
        }
        self.push_blocking(lane, message, max_wait).await
    }

    /// Like [`push_blocking`](Self::push_blocking), but gives up with
    /// [`Error::Cancelled`] as soon as `token` is cancelled.
    pub async fn push_blocking_with_cancel(
        &self,
        lane: usize,
        message: M,
        max_wait: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<Pushed<M>> {
        self.wait_and_push(lane, message, max_wait, Some(token))
            .await
    }

    async fn wait_and_push(
        &self,
        lane: usize,
        message: M,
        max_wait: Option<Duration>,
        token: Option<&CancellationToken>,
    ) -> Result<Pushed<M>> {
        let lanes = self.lane_count();
        if lane >= lanes {
            return Err(Error::InvalidPriority {
                priority: lane,
                lanes,
            });
        }

        let started = Instant::now();
        let mut backoff = INITIAL_PUSH_BACKOFF;

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::Cancelled);
            }

            if self.can_push() {
                self.push(TOP_PRIORITY_LANE, message)?;
                return Ok(Pushed::Accepted);
            }

            let mut delay = backoff;
            if let Some(max_wait) = max_wait {
                let waited = started.elapsed();
                if waited >= max_wait {
                    debug!(
                        queue = %self.name,
                        waited_ms = waited.as_millis() as u64,
                        "blocking push timed out"
                    );
                    return Ok(Pushed::TimedOut(message));
                }
                delay = delay.min(max_wait - waited);
            }

            match token {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
                None => sleep(delay).await,
            }

            backoff = backoff.saturating_mul(2).min(MAX_PUSH_BACKOFF);
        }
    }

    /// Remove the oldest message of the most urgent non-empty lane.
    pub fn poll(&self) -> Option<M> {
        if self.size() == 0 {
            return None;
        }
        let message = {
            let mut lanes = self.lock_lanes();
            let message = lanes.iter_mut().find_map(VecDeque::pop_front);
            if message.is_some() {
                self.size.fetch_sub(1, Ordering::AcqRel);
            }
            message
        };
        if message.is_some() {
            self.record_poll(1);
        }
        message
    }

    /// Take up to `max_count` messages in one sweep over the lanes.
    ///
    /// Lanes are visited once, in index order. Each lane is drained oldest
    /// first until it is empty or the batch is full, so a message is never
    /// taken while a more urgent one stays queued.
    pub fn poll_batch(&self, max_count: usize) -> Vec<M> {
        let mut batch = Vec::new();
        if max_count == 0 || self.size() == 0 {
            return batch;
        }
        {
            let mut lanes = self.lock_lanes();
            for lane in lanes.iter_mut() {
                let take = (max_count - batch.len()).min(lane.len());
                batch.extend(lane.drain(..take));
                if batch.len() >= max_count {
                    break;
                }
            }
            self.size.fetch_sub(batch.len(), Ordering::AcqRel);
        }
        if !batch.is_empty() {
            self.record_poll(batch.len() as u64);
        }
        batch
    }

    /// Total number of queued messages. Eventually consistent.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Per-lane message counts, most urgent first.
    pub fn lane_sizes(&self) -> Vec<usize> {
        self.lock_lanes().iter().map(VecDeque::len).collect()
    }

    fn record_poll(&self, count: u64) {
        metrics::queue_operations().add(
            count,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", "poll"),
            ],
        );
    }

    fn lock_lanes(&self) -> MutexGuard<'_, Vec<VecDeque<M>>> {
        // Lane mutations are single calls; a poisoned lock still guards
        // consistent lanes.
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<M> std::fmt::Debug for PrioritizedQueue<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrioritizedQueue")
            .field("name", &self.name)
            .field("size", &self.size.load(Ordering::Relaxed))
            .field("capacity", &self.capacity.load(Ordering::Relaxed))
            .finish()
    }
}
