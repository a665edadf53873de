//! Slot handoff channels
//!
//! Two lanes connect the claim engine and the allocator. The live
//! channel carries ready slots from the allocator (and from releasers)
//! to claimers; the dead channel carries retired slots back to the
//! allocator for reallocation or disposal. Both are `crossbeam`
//! channels: claimers need the blocking deadline poll, the allocator
//! needs a bounded wait so shutdown and resize stay responsive.
//!
//! Occupancy of the live channel is bounded by slot accounting, not by
//! channel capacity: each slot contributes at most one fresh entry,
//! plus the transiently stale entries the claim loop discards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};

use crate::slot::Slot;

/// MPMC handoff of ready slots. Entries are in state LIVING when
/// pushed; consumers re-validate with a CAS after the pop.
pub(crate) struct LiveChannel<T, E> {
    tx: Sender<Arc<Slot<T, E>>>,
    rx: Receiver<Arc<Slot<T, E>>>,
}

impl<T, E> LiveChannel<T, E> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn push(&self, slot: Arc<Slot<T, E>>) {
        // Send fails only when every receiver is gone, which cannot
        // happen while the pool core is alive.
        let _ = self.tx.send(slot);
    }

    /// Pop the next entry, parking until the deadline. `None` deadline
    /// means wait indefinitely.
    pub(crate) fn poll_until(&self, deadline: Option<Instant>) -> Option<Arc<Slot<T, E>>> {
        match deadline {
            Some(at) => self.rx.recv_deadline(at).ok(),
            None => self.rx.recv().ok(),
        }
    }

    pub(crate) fn try_poll(&self) -> Option<Arc<Slot<T, E>>> {
        self.rx.try_recv().ok()
    }
}

/// Handoff of retired slots toward the allocator. Many producers (any
/// claimer can retire a slot), one consumer by convention: only the
/// allocator loop pops.
pub(crate) struct DeadChannel<T, E> {
    tx: Sender<Arc<Slot<T, E>>>,
    rx: Receiver<Arc<Slot<T, E>>>,
}

impl<T, E> DeadChannel<T, E> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn push(&self, slot: Arc<Slot<T, E>>) {
        let _ = self.tx.send(slot);
    }

    pub(crate) fn recv_timeout(&self, wait: Duration) -> Option<Arc<Slot<T, E>>> {
        self.rx.recv_timeout(wait).ok()
    }

    pub(crate) fn try_recv(&self) -> Option<Arc<Slot<T, E>>> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    type TestSlot = Slot<u32, io::Error>;

    #[test]
    fn live_poll_is_fifo() {
        let live = LiveChannel::new();
        live.push(Arc::new(TestSlot::new(0, 1)));
        live.push(Arc::new(TestSlot::new(1, 2)));
        let first = live.poll_until(Some(Instant::now())).unwrap();
        let second = live.try_poll().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert!(live.try_poll().is_none());
    }

    #[test]
    fn live_poll_times_out_when_empty() {
        let live: LiveChannel<u32, io::Error> = LiveChannel::new();
        let started = Instant::now();
        let deadline = started + Duration::from_millis(30);
        assert!(live.poll_until(Some(deadline)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn dead_recv_timeout_returns_pending_slot() {
        let dead = DeadChannel::new();
        dead.push(Arc::new(TestSlot::new(4, 9)));
        let slot = dead.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(slot.index(), 4);
        assert!(dead.try_recv().is_none());
    }
}
