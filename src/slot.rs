//! Per-slot state machine and metadata
//!
//! A slot is the container for one pooled object: a padded atomic state
//! word plus metadata cells that only the slot's current owner touches.
//! Ownership follows the state machine: the allocator owns a DEAD slot,
//! the claiming thread owns a CLAIMED or TLR_CLAIMED slot, and nobody
//! owns the metadata of a LIVING slot (it is in flight between them).
//! Metadata writes are published by the release-ordered state
//! transition that hands the slot over.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;

/// Slot holds a live object, ready to be claimed.
pub(crate) const LIVING: u8 = 1;
/// Slot is exclusively held by a claimer.
pub(crate) const CLAIMED: u8 = 2;
/// Slot is exclusively held by a claimer that found it in its
/// thread-local cache; its live-channel entry was not consumed.
pub(crate) const TLR_CLAIMED: u8 = 3;
/// Slot has no usable object and waits for the allocator.
pub(crate) const DEAD: u8 = 4;

/// One pooled object's state machine and metadata.
pub(crate) struct Slot<T, E> {
    /// Padded to its own cache line; this is the only field that more
    /// than one thread mutates.
    state: CachePadded<AtomicU8>,
    index: usize,
    object: UnsafeCell<Option<T>>,
    poison: UnsafeCell<Option<E>>,
    created_at: UnsafeCell<Instant>,
    claim_count: UnsafeCell<u64>,
    stamp: UnsafeCell<u64>,
    rng: UnsafeCell<Xorshift128>,
}

// SAFETY: the UnsafeCell fields are only ever accessed by the thread
// that currently owns the slot per the state machine, and every
// ownership handover goes through a release/acquire transition on
// `state`. `T`/`E` only ever move between threads, never get shared.
unsafe impl<T: Send, E: Send> Send for Slot<T, E> {}
unsafe impl<T: Send, E: Send> Sync for Slot<T, E> {}

impl<T, E> Slot<T, E> {
    /// A slot is born DEAD; the allocator brings it to life.
    pub(crate) fn new(index: usize, seed: u64) -> Self {
        Self {
            state: CachePadded::new(AtomicU8::new(DEAD)),
            index,
            object: UnsafeCell::new(None),
            poison: UnsafeCell::new(None),
            created_at: UnsafeCell::new(Instant::now()),
            claim_count: UnsafeCell::new(0),
            stamp: UnsafeCell::new(0),
            rng: UnsafeCell::new(Xorshift128::seeded(seed)),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn cas(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn live2claim(&self) -> bool {
        self.cas(LIVING, CLAIMED)
    }

    pub(crate) fn live2claim_tlr(&self) -> bool {
        self.cas(LIVING, TLR_CLAIMED)
    }

    /// Steal a TLR claim into an ordinary claim. Used both by channel
    /// consumers resolving a stale entry and by a TLR holder that needs
    /// to kill or re-enqueue its own slot.
    pub(crate) fn claim_tlr2claim(&self) -> bool {
        self.cas(TLR_CLAIMED, CLAIMED)
    }

    /// Release after a TLR claim. Must be a CAS, never a store: a
    /// concurrent steal may have turned this claim into an ordinary
    /// CLAIMED, and the releaser has to notice so it takes the
    /// channel-push path instead.
    pub(crate) fn claim_tlr2live(&self) -> bool {
        self.cas(TLR_CLAIMED, LIVING)
    }

    /// Ordinary release. The store is release-ordered so the holder's
    /// object mutations are visible to the next claimer.
    pub(crate) fn claim2live(&self) {
        self.state.store(LIVING, Ordering::Release);
    }

    pub(crate) fn claim2dead(&self) -> bool {
        self.cas(CLAIMED, DEAD)
    }

    /// Proactive eviction of an idle slot (shrink, shutdown drain).
    pub(crate) fn live2dead(&self) -> bool {
        self.cas(LIVING, DEAD)
    }

    /// Publication of a freshly (re)allocated slot. Never fails: only
    /// the allocator touches DEAD slots.
    pub(crate) fn dead2live(&self) {
        self.state.store(LIVING, Ordering::Release);
    }
}

/// Owner-only metadata access.
///
/// Every method in this block requires that the caller currently owns
/// the slot: the allocator while DEAD, the claimer while CLAIMED or
/// TLR_CLAIMED. Each is `unsafe` because nothing in the signature can
/// prove that.
impl<T, E> Slot<T, E> {
    pub(crate) unsafe fn object_ref(&self) -> Option<&T> {
        unsafe { (*self.object.get()).as_ref() }
    }

    pub(crate) unsafe fn object_mut(&self) -> Option<&mut T> {
        unsafe { (*self.object.get()).as_mut() }
    }

    pub(crate) unsafe fn take_object(&self) -> Option<T> {
        unsafe { (*self.object.get()).take() }
    }

    pub(crate) unsafe fn take_poison(&self) -> Option<E> {
        unsafe { (*self.poison.get()).take() }
    }

    pub(crate) unsafe fn set_poison(&self, cause: E) {
        unsafe { *self.poison.get() = Some(cause) };
    }

    pub(crate) unsafe fn claim_count(&self) -> u64 {
        unsafe { *self.claim_count.get() }
    }

    pub(crate) unsafe fn increment_claims(&self) {
        unsafe { *self.claim_count.get() += 1 };
    }

    /// Install a fresh object and reset the per-life metadata. The
    /// PRNG deliberately survives so reallocation does not correlate
    /// the jitter streams of recycled slots.
    pub(crate) unsafe fn install_object(&self, object: T) {
        unsafe {
            *self.object.get() = Some(object);
            *self.created_at.get() = Instant::now();
            *self.claim_count.get() = 0;
            *self.stamp.get() = 0;
        }
    }

    /// Metadata view handed to factories and expiration predicates.
    pub(crate) unsafe fn info(&self) -> SlotInfo<'_> {
        unsafe {
            SlotInfo {
                index: self.index,
                created_at: *self.created_at.get(),
                claim_count: *self.claim_count.get(),
                stamp: &mut *self.stamp.get(),
                rng: &mut *self.rng.get(),
            }
        }
    }
}

/// A view of one slot's metadata, handed to the [`ObjectFactory`] on
/// allocation and to the [`ExpirationPolicy`] on every claim of a
/// previously-used object.
///
/// The stamp is opaque scratch space: the pool zeroes it on every
/// reallocation and otherwise never touches it, so a policy can cache
/// whatever bookkeeping it wants there. The random generator is
/// per-slot xorshift128 state, so predicates can jitter thresholds
/// without contending on a shared source.
///
/// [`ObjectFactory`]: crate::ObjectFactory
/// [`ExpirationPolicy`]: crate::ExpirationPolicy
pub struct SlotInfo<'a> {
    index: usize,
    created_at: Instant,
    claim_count: u64,
    stamp: &'a mut u64,
    rng: &'a mut Xorshift128,
}

impl SlotInfo<'_> {
    /// Index of the slot within its pool. Stable for the slot's whole
    /// lifetime, across reallocations.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Time since the current object was allocated.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Successful claims of the current object.
    pub fn claim_count(&self) -> u64 {
        self.claim_count
    }

    /// Opaque scratch value; zeroed on every reallocation.
    pub fn stamp(&self) -> u64 {
        *self.stamp
    }

    pub fn set_stamp(&mut self, stamp: u64) {
        *self.stamp = stamp;
    }

    pub fn random_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    pub fn random_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

/// Marsaglia xorshift128 with a 2^128-1 period. One per slot, so the
/// expiration path never shares generator state across threads.
pub(crate) struct Xorshift128 {
    x: u32,
    y: u32,
    z: u32,
    w: u32,
}

impl Xorshift128 {
    pub(crate) fn seeded(seed: u64) -> Self {
        let mut s = seed;
        let x = splitmix32(&mut s);
        let y = splitmix32(&mut s);
        let z = splitmix32(&mut s);
        let w = splitmix32(&mut s);
        // All-zero state is the one fixed point; nudge away from it.
        if x | y | z | w == 0 {
            return Self::seeded(seed.wrapping_add(0x9e37_79b9_7f4a_7c15));
        }
        Self { x, y, z, w }
    }

    pub(crate) fn next_u32(&mut self) -> u32 {
        let t = self.x ^ (self.x << 11);
        self.x = self.y;
        self.y = self.z;
        self.z = self.w;
        self.w = self.w ^ (self.w >> 19) ^ (t ^ (t >> 8));
        self.w
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }
}

fn splitmix32(state: &mut u64) -> u32 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    (z ^ (z >> 31)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    type TestSlot = Slot<String, io::Error>;

    #[test]
    fn born_dead() {
        let slot = TestSlot::new(0, 7);
        assert_eq!(slot.state(), DEAD);
    }

    #[test]
    fn allocation_claim_release_cycle() {
        let slot = TestSlot::new(0, 7);
        unsafe { slot.install_object("a".to_string()) };
        slot.dead2live();
        assert!(slot.live2claim());
        assert!(!slot.live2claim(), "double claim must fail");
        slot.claim2live();
        assert!(slot.live2claim_tlr());
        assert!(slot.claim_tlr2live());
    }

    #[test]
    fn steal_converts_tlr_claim() {
        let slot = TestSlot::new(0, 7);
        slot.dead2live();
        assert!(slot.live2claim_tlr());
        // Another thread resolves the stale channel entry.
        assert!(slot.claim_tlr2claim());
        // The owner's TLR release must now fail and re-read.
        assert!(!slot.claim_tlr2live());
        assert_eq!(slot.state(), CLAIMED);
        slot.claim2live();
        assert_eq!(slot.state(), LIVING);
    }

    #[test]
    fn install_resets_life_metadata() {
        let slot = TestSlot::new(3, 99);
        unsafe {
            slot.install_object("a".to_string());
            slot.increment_claims();
            slot.info().set_stamp(42);
            assert_eq!(slot.claim_count(), 1);
            slot.install_object("b".to_string());
            assert_eq!(slot.claim_count(), 0);
            assert_eq!(slot.info().stamp(), 0);
            assert_eq!(slot.object_ref(), Some(&"b".to_string()));
        }
    }

    #[test]
    fn rng_streams_differ_across_seeds() {
        let mut a = Xorshift128::seeded(1);
        let mut b = Xorshift128::seeded(2);
        let first: Vec<u32> = (0..8).map(|_| a.next_u32()).collect();
        let second: Vec<u32> = (0..8).map(|_| b.next_u32()).collect();
        assert_ne!(first, second);
    }

    #[test]
    fn rng_survives_zero_seed() {
        let mut rng = Xorshift128::seeded(0);
        assert!((0..16).any(|_| rng.next_u32() != 0));
    }
}
