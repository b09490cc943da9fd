//! Partition work queue shared by the fetch workers
//!
//! The queue knows how many partitions are currently being worked on, so an
//! empty queue only means "done" once nothing in flight can still push
//! children back onto it.

use crate::catalog::Partition;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Partition>,
    in_flight: usize,
}

/// FIFO of partitions with in-flight tracking
#[derive(Debug, Default)]
pub struct PartitionQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PartitionQueue {
    pub fn new(initial: Vec<Partition>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: initial.into(),
                in_flight: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Takes the next partition, waiting while other workers may still add work
    ///
    /// # Returns
    ///
    /// * `Some(Partition)` - A partition, now counted as in flight
    /// * `None` - The queue is drained with nothing in flight, or the crawl was cancelled
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Partition> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent complete() is not missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if cancel.is_cancelled() {
                    return None;
                }
                if let Some(partition) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(partition);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Marks a popped partition as finished and enqueues its replacements
    pub fn complete(&self, children: Vec<Partition>) {
        {
            let mut state = self.lock();
            state.pending.extend(children);
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
