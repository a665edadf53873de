//! The allocator loop
//!
//! One background worker per pool performs every allocation,
//! deallocation, and reallocation, so claimers never pay construction
//! cost. The worker drains the dead channel, births slots toward the
//! target size, evicts surplus when the target shrinks, and, once
//! shutdown is flagged, destroys everything it can reach until the
//! pool is empty.
//!
//! Serialising all of this on one worker keeps size accounting simple
//! and guarantees at most one destructor runs per object at a time.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::factory::ObjectFactory;
use crate::metrics::MetricsTracker;
use crate::pool::PoolCore;
use crate::slot::{LIVING, Slot, TLR_CLAIMED};

/// Upper bound on one blocking wait, so target changes and shutdown
/// are picked up promptly.
const ALLOCATOR_TICK: Duration = Duration::from_millis(10);

/// Drain ticks before suspecting a leaked claim, roughly five seconds.
const LEAK_WARN_TICKS: u64 = 500;

pub(crate) fn run<F: ObjectFactory>(core: Arc<PoolCore<F>>) {
    tracing::debug!(pool = core.pool_id, "allocator started");
    let mut drain_ticks: u64 = 0;
    loop {
        if core.is_shutdown() {
            if drain(&core) {
                break;
            }
            drain_ticks += 1;
            if drain_ticks == LEAK_WARN_TICKS {
                tracing::warn!(
                    pool = core.pool_id,
                    outstanding = core.claimed_count(),
                    "shutdown stalled waiting on unreleased claims"
                );
            }
            continue;
        }

        top_up(&core);
        evict_surplus(&core);

        if let Some(slot) = core.dead.recv_timeout(ALLOCATOR_TICK) {
            dispose(&core, slot);
        }
    }
    core.completion.signal();
    tracing::debug!(pool = core.pool_id, "allocator exited");
}

/// Birth DEAD slots until the pool holds `target` of them. Newborns
/// are registered immediately, so they count against the target while
/// their first allocation is still in flight.
pub(crate) fn top_up<F: ObjectFactory>(core: &PoolCore<F>) {
    let target = core.target();
    while core.slots.len() < target {
        let index = core.next_index.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::new(index, slot_seed(core.pool_id, index)));
        core.slots.insert(index, Arc::clone(&slot));
        core.dead.push(slot);
    }
}

/// While over target, pull idle slots off the live channel and retire
/// them. Slots currently claimed shrink later, when their release
/// cycles them back through a channel.
pub(crate) fn evict_surplus<F: ObjectFactory>(core: &PoolCore<F>) {
    while core.slots.len() > core.target() {
        let Some(slot) = core.live.try_poll() else {
            break;
        };
        let evicted = loop {
            match slot.state() {
                LIVING => {
                    if slot.live2dead() {
                        break true;
                    }
                }
                TLR_CLAIMED => {
                    // Convert the holder's claim; its release will then
                    // feed a channel we can evict from. This entry is
                    // spent either way.
                    if slot.claim_tlr2claim() {
                        break false;
                    }
                }
                _ => break false, // stale entry
            }
        };
        if evicted {
            tracing::debug!(pool = core.pool_id, slot = slot.index(), "evicting surplus slot");
            destroy_slot(core, &slot);
        }
    }
}

/// Decide what a dead slot becomes: retired if the pool is over
/// target, reallocated otherwise.
pub(crate) fn dispose<F: ObjectFactory>(core: &PoolCore<F>, slot: Arc<Slot<F::Object, F::Error>>) {
    if core.slots.len() > core.target() {
        tracing::debug!(pool = core.pool_id, slot = slot.index(), "shrinking: retiring dead slot");
        destroy_slot(core, &slot);
        return;
    }
    reallocate(core, slot);
}

fn reallocate<F: ObjectFactory>(core: &PoolCore<F>, slot: Arc<Slot<F::Object, F::Error>>) {
    // SAFETY: the slot is DEAD and off both channels; the allocator is
    // its owner until dead2live publishes it.
    let old = unsafe { slot.take_object() };
    let result = {
        let mut info = unsafe { slot.info() };
        match old {
            Some(object) => core.factory.recreate(&mut info, object),
            None => core.factory.create(&mut info),
        }
    };
    match result {
        Ok(object) => {
            unsafe { slot.install_object(object) };
            MetricsTracker::bump(&core.metrics.objects_allocated);
            tracing::trace!(pool = core.pool_id, slot = slot.index(), "slot allocated");
            slot.dead2live();
            core.live.push(slot);
        }
        Err(cause) => {
            tracing::warn!(
                pool = core.pool_id,
                slot = slot.index(),
                error = %cause,
                "allocation failed; slot poisoned"
            );
            unsafe { slot.set_poison(cause) };
            core.poisoned_slots.fetch_add(1, Ordering::AcqRel);
            MetricsTracker::bump(&core.metrics.allocation_failures);
            // Published anyway: the next claimer surfaces the failure
            // and cycles the slot back here for another attempt.
            slot.dead2live();
            core.live.push(slot);
        }
    }
}

/// One shutdown pass: kill whatever is reachable, then report whether
/// the pool has fully emptied.
pub(crate) fn drain<F: ObjectFactory>(core: &PoolCore<F>) -> bool {
    while let Some(slot) = core.live.try_poll() {
        let killed = loop {
            match slot.state() {
                LIVING => {
                    if slot.live2dead() {
                        break true;
                    }
                }
                TLR_CLAIMED => {
                    // The holder's release now takes the ordinary path
                    // and, seeing shutdown, routes to the dead channel.
                    if slot.claim_tlr2claim() {
                        break false;
                    }
                }
                _ => break false,
            }
        };
        if killed {
            destroy_slot(core, &slot);
        }
    }

    while let Some(slot) = core.dead.try_recv() {
        destroy_slot(core, &slot);
    }

    if core.slots.is_empty() {
        return true;
    }

    // Whatever remains is claimed; park briefly for releases.
    if let Some(slot) = core.dead.recv_timeout(ALLOCATOR_TICK) {
        destroy_slot(core, &slot);
    }
    core.slots.is_empty()
}

/// Permanently remove a slot the allocator owns. The object, if any,
/// goes through the factory's destroy.
fn destroy_slot<F: ObjectFactory>(core: &PoolCore<F>, slot: &Arc<Slot<F::Object, F::Error>>) {
    // SAFETY: the slot is DEAD and unreachable from both channels.
    if let Some(object) = unsafe { slot.take_object() } {
        core.factory.destroy(object);
        MetricsTracker::bump(&core.metrics.objects_destroyed);
    }
    // A poisoned slot can get here without a claimer ever surfacing
    // the failure (eviction, drain); keep the gauge honest.
    if unsafe { slot.take_poison() }.is_some() {
        core.note_poison_cleared();
    }
    core.slots.remove(&slot.index());
}

fn slot_seed(pool_id: u64, index: usize) -> u64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(pool_id);
    hasher.write_usize(index);
    hasher.finish()
}
