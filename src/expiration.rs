//! Expiration policies for retiring pooled objects

use std::time::Duration;

use crate::slot::SlotInfo;

/// Decides whether a slot's current object should be retired.
///
/// The pool consults the policy on every claim of a previously-used
/// object, on the claiming thread, so implementations must be cheap.
/// An expired slot is retired and the claim moves on to the next live
/// slot; the allocator replaces the retired object in the background.
///
/// The policy sees metadata only (age, claim count, stamp, per-slot
/// randomness), never the object itself; retirement decisions that
/// need to inspect the object belong in the factory's `recreate`.
///
/// Panics in a policy are not caught: the policy is user code on the
/// claim hot path, and swallowing its failures would hide bugs.
pub trait ExpirationPolicy: Send + Sync + 'static {
    /// True to retire the slot's current object.
    fn has_expired(&self, slot: &mut SlotInfo<'_>) -> bool;
}

/// Time-spread expiration: each object lives for a random duration
/// drawn uniformly from `[lower, upper]`.
///
/// The jitter de-synchronises end-of-life across the pool, so a fleet
/// of connections established together does not expire together and
/// stampede the factory. The drawn deadline comes from the slot's own
/// generator and is memoised in the slot stamp, so the steady-state
/// check is a single comparison.
///
/// # Examples
///
/// ```
/// use slotpool::TimeSpread;
/// use std::time::Duration;
///
/// // Retire connections somewhere between 30 and 40 minutes old.
/// let policy = TimeSpread::new(
///     Duration::from_secs(30 * 60),
///     Duration::from_secs(40 * 60),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct TimeSpread {
    lower: Duration,
    upper: Duration,
}

impl TimeSpread {
    /// Build a policy expiring objects at a random age in
    /// `[lower, upper]`.
    ///
    /// # Panics
    ///
    /// Panics if `lower > upper` or `upper` is zero.
    pub fn new(lower: Duration, upper: Duration) -> Self {
        assert!(lower <= upper, "expiration lower bound exceeds upper bound");
        assert!(!upper.is_zero(), "expiration upper bound must be non-zero");
        Self { lower, upper }
    }

    pub fn lower(&self) -> Duration {
        self.lower
    }

    pub fn upper(&self) -> Duration {
        self.upper
    }
}

/// The stock pool default: 8 to 10 minutes.
impl Default for TimeSpread {
    fn default() -> Self {
        Self::new(Duration::from_secs(8 * 60), Duration::from_secs(10 * 60))
    }
}

impl ExpirationPolicy for TimeSpread {
    fn has_expired(&self, slot: &mut SlotInfo<'_>) -> bool {
        let mut deadline = slot.stamp();
        if deadline == 0 {
            // First evaluation for this object's life: draw and memoise.
            let lower = self.lower.as_nanos() as u64;
            let upper = self.upper.as_nanos() as u64;
            let span = upper - lower;
            deadline = if span == 0 {
                lower
            } else {
                lower + slot.random_u64() % (span + 1)
            };
            // Zero is the draw-again sentinel; a zero lower bound with
            // an unlucky roll must not re-draw forever.
            deadline = deadline.max(1);
            slot.set_stamp(deadline);
        }
        slot.age().as_nanos() as u64 >= deadline
    }
}

/// Objects live until the pool retires them for other reasons
/// (shutdown, shrink, explicit expiry).
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpire;

impl ExpirationPolicy for NeverExpire {
    fn has_expired(&self, _slot: &mut SlotInfo<'_>) -> bool {
        false
    }
}

/// Fixed time-to-live: every object is retired once it reaches `ttl`,
/// with no spread. Prefer [`TimeSpread`] for fleets that allocate in
/// bursts.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge {
    ttl: Duration,
}

impl MaxAge {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl ExpirationPolicy for MaxAge {
    fn has_expired(&self, slot: &mut SlotInfo<'_>) -> bool {
        slot.age() >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Slot;
    use std::io;
    use std::thread;

    type TestSlot = Slot<(), io::Error>;

    fn fresh_slot(index: usize) -> TestSlot {
        let slot = TestSlot::new(index, index as u64 + 11);
        unsafe { slot.install_object(()) };
        slot
    }

    #[test]
    fn time_spread_draws_within_bounds() {
        let policy = TimeSpread::new(Duration::from_secs(60), Duration::from_secs(90));
        for index in 0..64 {
            let slot = fresh_slot(index);
            let mut info = unsafe { slot.info() };
            assert!(!policy.has_expired(&mut info), "fresh object expired");
            let drawn = info.stamp();
            assert!(drawn >= Duration::from_secs(60).as_nanos() as u64);
            assert!(drawn <= Duration::from_secs(90).as_nanos() as u64);
        }
    }

    #[test]
    fn time_spread_memoises_the_deadline() {
        let policy = TimeSpread::default();
        let slot = fresh_slot(0);
        let first = {
            let mut info = unsafe { slot.info() };
            policy.has_expired(&mut info);
            info.stamp()
        };
        let second = {
            let mut info = unsafe { slot.info() };
            policy.has_expired(&mut info);
            info.stamp()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn time_spread_expires_old_objects() {
        let policy = TimeSpread::new(Duration::from_millis(5), Duration::from_millis(5));
        let slot = fresh_slot(0);
        {
            let mut info = unsafe { slot.info() };
            assert!(!policy.has_expired(&mut info));
        }
        thread::sleep(Duration::from_millis(10));
        let mut info = unsafe { slot.info() };
        assert!(policy.has_expired(&mut info));
    }

    #[test]
    fn deadlines_spread_across_slots() {
        let policy = TimeSpread::new(Duration::from_secs(1), Duration::from_secs(3600));
        let a = fresh_slot(1);
        let b = fresh_slot(2);
        let mut info_a = unsafe { a.info() };
        let mut info_b = unsafe { b.info() };
        policy.has_expired(&mut info_a);
        policy.has_expired(&mut info_b);
        assert_ne!(info_a.stamp(), info_b.stamp());
    }

    #[test]
    fn max_age_is_sharp() {
        let policy = MaxAge::new(Duration::from_millis(5));
        let slot = fresh_slot(0);
        {
            let mut info = unsafe { slot.info() };
            assert!(!policy.has_expired(&mut info));
        }
        thread::sleep(Duration::from_millis(10));
        let mut info = unsafe { slot.info() };
        assert!(policy.has_expired(&mut info));
    }

    #[test]
    fn never_expire_never_expires() {
        let slot = fresh_slot(0);
        let mut info = unsafe { slot.info() };
        assert!(!NeverExpire.has_expired(&mut info));
    }
}
