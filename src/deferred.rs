//! Deferred execution queue: hand-off from radio callbacks to the loop.
//!
//! ```text
//!  Radio stack task(s)                      Application loop (one thread)
//!  ───────────────────                      ─────────────────────────────
//!  write / security callback                tick()
//!       │                                      │
//!       ├─► push(closure) ──► [ Channel<16> ] ─┴─► drain_one(&mut ctx)
//!       │     (try_send, never blocks)             pops ≤ 1 closure, runs it
//!       └─ full → warn!, closure dropped
//! ```
//!
//! Backed by an embassy-sync [`Channel`] guarded by a
//! [`CriticalSectionRawMutex`], so `push` is safe from any number of
//! concurrent producers while a single consumer drains it.
//!
//! Closures receive `&mut C`, the loop-owned context. Every mutation of
//! loop-owned state therefore happens on the loop thread.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::warn;

/// Queue depth. Pushes beyond this are dropped.
pub const DEFERRED_QUEUE_CAPACITY: usize = 16;

/// A unit of work executed later on the loop thread.
pub type DeferredFn<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Bounded FIFO of deferred closures.
pub struct DeferredQueue<C, const N: usize = DEFERRED_QUEUE_CAPACITY> {
    channel: Channel<CriticalSectionRawMutex, DeferredFn<C>, N>,
}

impl<C, const N: usize> DeferredQueue<C, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueue `work` from any context.
    ///
    /// Returns `false` when the queue is full; the closure is dropped and a
    /// warning is logged. Never blocks.
    pub fn push<F>(&self, work: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        match self.channel.try_send(Box::new(work)) {
            Ok(()) => true,
            Err(TrySendError::Full(_dropped)) => {
                warn!("Deferred queue is full ({} entries), dropping work item", N);
                false
            }
        }
    }

    /// Pop and run at most one closure. Call only from the loop thread.
    pub fn drain_one(&self, ctx: &mut C) -> bool {
        match self.channel.try_receive() {
            Ok(work) => {
                work(ctx);
                true
            }
            Err(_) => false,
        }
    }

    /// Number of closures waiting.
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<C, const N: usize> Default for DeferredQueue<C, N> {
    fn default() -> Self {
        Self::new()
    }
}
