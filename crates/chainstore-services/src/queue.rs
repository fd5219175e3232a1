//! Pending queue shared by upload workers.
//!
//! Holds chunks not yet confirmed. A worker that fails a chunk puts it back
//! at the front so it is retried before fresh work. `next` returns `None`
//! only once every chunk has been completed or given up on, so a worker
//! never exits while a peer may still re-queue something.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use chainstore_core::Chunk;

#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk: Chunk,
    /// Failed attempts so far.
    pub attempts: u32,
}

struct QueueState {
    pending: VecDeque<PendingChunk>,
    /// Chunks taken or queued that have not been completed yet.
    outstanding: usize,
}

pub struct PendingQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

impl PendingQueue {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        let pending: VecDeque<PendingChunk> = chunks
            .into_iter()
            .map(|chunk| PendingChunk { chunk, attempts: 0 })
            .collect();
        Self {
            state: Mutex::new(QueueState {
                outstanding: pending.len(),
                pending,
            }),
            changed: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the next chunk, waiting while peers still hold unfinished work.
    pub async fn next(&self) -> Option<PendingChunk> {
        loop {
            // Registered before the check so a wakeup in between is not lost.
            let notified = self.changed.notified();
            {
                let mut state = self.state();
                if let Some(item) = state.pending.pop_front() {
                    return Some(item);
                }
                if state.outstanding == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Put a failed chunk back at the front.
    pub fn requeue(&self, item: PendingChunk) {
        self.state().pending.push_front(item);
        self.changed.notify_waiters();
    }

    /// Mark a taken chunk as finished, confirmed or abandoned.
    pub fn complete(&self) {
        {
            let mut state = self.state();
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }
}
