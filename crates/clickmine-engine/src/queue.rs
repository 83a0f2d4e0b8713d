//! Bounded-admission FIFO queue.
//!
//! `wait` suspends the caller until one of N slots is free; `end`
//! releases a slot and admits the longest-waiting caller. Admission
//! decisions and the waiting list are mutated under one lock, so order
//! can never be observed inconsistently.
//!
//! There is no cancellation: a caller that abandons its `wait` keeps
//! its place and is eventually admitted anyway, so a guarded section
//! must always reach `end`. Tokens are opaque and single-use.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, oneshot};

use clickmine_core::{MinerError, Result};

/// Opaque identity of one `wait`/`end` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobToken(u64);

struct QueueState {
    admitted: HashSet<u64>,
    waiting: VecDeque<(u64, oneshot::Sender<()>)>,
}

/// FIFO admission gate bounding concurrent holders to a fixed count.
///
/// Two instances guard two very different resources in this codebase:
/// channel joins (one queue per account, limit 1) and solver page
/// fetches (one queue per process, limit from config).
pub struct ConcurrencyQueue {
    limit: usize,
    next_token: AtomicU64,
    state: Mutex<QueueState>,
}

impl ConcurrencyQueue {
    /// A zero limit would never admit anyone; it is clamped to one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            next_token: AtomicU64::new(1),
            state: Mutex::new(QueueState {
                admitted: HashSet::new(),
                waiting: VecDeque::new(),
            }),
        }
    }

    /// Issue a fresh token for one `wait`/`end` pair.
    pub fn issue(&self) -> JobToken {
        JobToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Suspend until a slot is free, then hold it under `token`.
    pub async fn wait(&self, token: JobToken) {
        let waiter = {
            let mut state = self.state.lock().await;
            if state.admitted.len() < self.limit {
                state.admitted.insert(token.0);
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiting.push_back((token.0, tx));
                Some(rx)
            }
        };
        if let Some(rx) = waiter {
            // The sender side lives in the queue state and is fired by
            // `end`; it is only dropped if the queue itself is dropped.
            let _ = rx.await;
        }
    }

    /// Release the slot held by `token` and admit the next waiter in
    /// arrival order.
    ///
    /// A token that was never admitted means the queue and its callers
    /// have desynchronized; that is reported, never ignored.
    pub async fn end(&self, token: JobToken) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.admitted.remove(&token.0) {
            return Err(MinerError::QueueDesync(token.0));
        }
        if let Some((next, tx)) = state.waiting.pop_front() {
            state.admitted.insert(next);
            let _ = tx.send(());
        }
        Ok(())
    }

    /// Number of currently admitted holders.
    pub async fn active(&self) -> usize {
        self.state.lock().await.admitted.len()
    }

    /// Number of callers parked behind the limit.
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.waiting.len()
    }
}
