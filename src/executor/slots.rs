// src/executor/slots.rs
//! Priority-aware bounded worker slots
//!
//! A fixed number of slots caps concurrent simulation jobs. When all slots
//! are taken, acquirers queue as waiters ordered by (priority desc,
//! submission sequence asc): higher-priority batches are granted freed slots
//! first, equal priorities go FIFO. A released slot is handed directly to
//! the best waiter instead of returning to the free count, so a low-priority
//! acquirer can never slip past a queued high-priority one.
//!
//! The grant carries the [`SlotPermit`] itself through the waiter's channel.
//! If the waiting `acquire` future is dropped after the grant was sent but
//! before it was received (a timeout or cancellation racing the hand-off),
//! the unclaimed permit drops with the channel and releases the slot again,
//! so no exit path can leak capacity.

use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};

struct Waiter {
    priority: u32,
    seq: u64,
    grant: oneshot::Sender<SlotPermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then earliest submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SlotState {
    available: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

/// Bounded pool of worker slots with priority-ordered admission
pub struct WorkerSlots {
    capacity: usize,
    state: Mutex<SlotState>,
}

impl WorkerSlots {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        debug!(capacity, "Initializing worker slots");
        Arc::new(Self {
            capacity,
            state: Mutex::new(SlotState {
                available: capacity,
                next_seq: 0,
                waiters: BinaryHeap::new(),
            }),
        })
    }

    /// Acquire a slot, queueing behind higher-priority waiters when the
    /// pool is saturated. The returned permit releases its slot on drop.
    pub async fn acquire(self: &Arc<Self>, priority: u32) -> Result<SlotPermit> {
        let rx = {
            let mut state = self.state.lock();
            // Dead waiters (acquire futures dropped while queued) would
            // otherwise block the fast path while a slot sits free.
            while let Some(top) = state.waiters.peek() {
                if top.grant.is_closed() {
                    state.waiters.pop();
                } else {
                    break;
                }
            }
            if state.available > 0 && state.waiters.is_empty() {
                state.available -= 1;
                trace!(available = state.available, "Acquired worker slot");
                return Ok(SlotPermit::new(Arc::clone(self)));
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter {
                priority,
                seq,
                grant: tx,
            });
            trace!(priority, seq, "Queued for worker slot");
            rx
        };

        rx.await.map_err(|_| EngineError::PoolExhausted)
    }

    fn release(self: &Arc<Self>) {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                match state.waiters.pop() {
                    Some(waiter) => waiter,
                    None => {
                        state.available = (state.available + 1).min(self.capacity);
                        return;
                    }
                }
            };
            // Hand the slot straight to the best waiter as a live permit
            match waiter.grant.send(SlotPermit::new(Arc::clone(self))) {
                Ok(()) => {
                    trace!(seq = waiter.seq, "Granted slot to queued waiter");
                    return;
                }
                Err(mut unclaimed) => {
                    // Waiter vanished before the hand-off; keep the slot in
                    // hand and try the next waiter
                    unclaimed.defuse();
                }
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free (not counting queued waiters)
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Acquirers currently queued behind a saturated pool
    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

/// RAII permit for one worker slot; dropping it releases the slot
pub struct SlotPermit {
    slots: Option<Arc<WorkerSlots>>,
}

impl SlotPermit {
    fn new(slots: Arc<WorkerSlots>) -> Self {
        Self { slots: Some(slots) }
    }

    /// Detach from the slot without releasing it (the caller keeps the
    /// slot in hand)
    fn defuse(&mut self) {
        self.slots = None;
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.take() {
            slots.release();
        }
    }
}
