//! The object factory contract

use crate::slot::SlotInfo;

/// Creates, destroys, and optionally recycles the pooled objects.
///
/// All three operations run on the pool's allocator thread, never on a
/// claiming thread, so a slow `create` delays replenishment but not
/// `claim` calls that can be served from already-live slots.
///
/// A failed `create` is captured into the slot's poison and surfaced to
/// the next claimer as [`PoolError::Poisoned`](crate::PoolError::Poisoned);
/// the pool then retries the slot in the background until the factory
/// succeeds again.
///
/// # Examples
///
/// ```
/// use slotpool::ObjectFactory;
/// use slotpool::SlotInfo;
/// use std::convert::Infallible;
///
/// struct BufferFactory;
///
/// impl ObjectFactory for BufferFactory {
///     type Object = Vec<u8>;
///     type Error = Infallible;
///
///     fn create(&self, _slot: &mut SlotInfo<'_>) -> Result<Vec<u8>, Infallible> {
///         Ok(Vec::with_capacity(64 * 1024))
///     }
/// }
/// ```
pub trait ObjectFactory: Send + Sync + 'static {
    /// The pooled object type.
    type Object: Send + 'static;

    /// The failure type `create`/`recreate` can produce.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce a fresh object for the given slot.
    fn create(&self, slot: &mut SlotInfo<'_>) -> Result<Self::Object, Self::Error>;

    /// Dispose of an object that is leaving the pool for good.
    ///
    /// The default drops it.
    fn destroy(&self, object: Self::Object) {
        drop(object);
    }

    /// Replace an expired object, optionally reusing its carcass.
    ///
    /// The default destroys the old object and creates a new one.
    /// Override when a partial reset (e.g. a connection handshake
    /// refresh) is cheaper than a full rebuild.
    fn recreate(
        &self,
        slot: &mut SlotInfo<'_>,
        old: Self::Object,
    ) -> Result<Self::Object, Self::Error> {
        self.destroy(old);
        self.create(slot)
    }
}
