//! Reentrant dirty-broadcast batching.
//!
//! While a batch is open, aggregators with listeners record themselves instead
//! of broadcasting. When the outermost batch closes, every recorded aggregator
//! broadcasts exactly once, in the order it was first dirtied.
//!
//! State is per thread: aggregation is single-threaded and `Rc`-based.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Weak;

use crate::aggregator::{Aggregator, AggregatorRef};

#[derive(Default)]
struct BatchState {
    count: u32,
    dirty: Vec<Weak<RefCell<Aggregator>>>,
    from_network_update: bool,
    net_update_id: u32,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Process-wide (per thread) batch lock. Prefer [`ScopedDirtyBatch`] over manual pairing.
pub struct DirtyBatch;

impl DirtyBatch {
    pub fn begin_lock() {
        BATCH.with(|batch| batch.borrow_mut().count += 1);
    }

    /// Closes one level. Closing the outermost level flushes the deferred set.
    ///
    /// Unbalanced calls (count already zero) are ignored.
    pub fn end_lock() {
        let flush = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            if batch.count == 0 {
                return None;
            }
            batch.count -= 1;
            (batch.count == 0).then(|| std::mem::take(&mut batch.dirty))
        });

        // Broadcasts may open new batches; those flush on their own.
        for weak in flush.into_iter().flatten() {
            if let Some(aggregator) = AggregatorRef::upgrade(&weak) {
                aggregator.broadcast_on_dirty();
            }
        }
    }

    /// Opens a lock for one incoming network state update.
    pub fn begin_net_receive_lock() {
        Self::begin_lock();
    }

    /// Ends the network update, collapsing any nested locks into one flush.
    ///
    /// The flush runs with [`is_from_network_update`](Self::is_from_network_update)
    /// set and a fresh [`net_update_id`](Self::net_update_id). Once the lock has
    /// been collapsed further calls are no-ops.
    pub fn end_net_receive_lock() {
        let collapsed = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            if batch.count == 0 {
                return false;
            }
            batch.count = 1;
            batch.net_update_id = batch.net_update_id.wrapping_add(1);
            batch.from_network_update = true;
            true
        });
        if !collapsed {
            return;
        }

        Self::end_lock();
        BATCH.with(|batch| batch.borrow_mut().from_network_update = false);
    }

    pub fn is_locked() -> bool {
        Self::lock_count() > 0
    }

    pub fn lock_count() -> u32 {
        BATCH.with(|batch| batch.borrow().count)
    }

    pub fn is_from_network_update() -> bool {
        BATCH.with(|batch| batch.borrow().from_network_update)
    }

    /// Id of the most recent network update. Starts at zero.
    pub fn net_update_id() -> u32 {
        BATCH.with(|batch| batch.borrow().net_update_id)
    }

    /// Number of aggregators waiting for the flush.
    pub fn pending() -> usize {
        BATCH.with(|batch| batch.borrow().dirty.len())
    }

    pub(crate) fn defer(aggregator: &AggregatorRef) {
        let weak = aggregator.downgrade();
        BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            if !batch.dirty.iter().any(|queued| Weak::ptr_eq(queued, &weak)) {
                batch.dirty.push(weak);
            }
        });
    }
}

/// RAII guard that holds a [`DirtyBatch`] lock for its lifetime.
#[must_use = "the batch closes as soon as the guard is dropped"]
pub struct ScopedDirtyBatch {
    // Thread-local state: the guard must be dropped on the thread that made it.
    _not_send: PhantomData<*const ()>,
}

impl ScopedDirtyBatch {
    pub fn new() -> Self {
        DirtyBatch::begin_lock();
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for ScopedDirtyBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedDirtyBatch {
    fn drop(&mut self) {
        DirtyBatch::end_lock();
    }
}
