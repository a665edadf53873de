//! The pool, the claim engine, and the claim handle

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::alloc;
use crate::channel::{DeadChannel, LiveChannel};
use crate::completion::{Completion, CompletionSignal};
use crate::config::{BackgroundScheduler, PoolConfig};
use crate::errors::{PoolError, PoolResult};
use crate::expiration::ExpirationPolicy;
use crate::factory::ObjectFactory;
use crate::health::HealthStatus;
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};
use crate::slot::{CLAIMED, LIVING, Slot, TLR_CLAIMED};
use crate::tlr;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Everything shared between the pool handle, the claim handles, and
/// the allocator worker. Slots are owned by the registry; the channels
/// carry non-owning `Arc` references into it.
pub(crate) struct PoolCore<F: ObjectFactory> {
    pub(crate) pool_id: u64,
    pub(crate) slots: DashMap<usize, Arc<Slot<F::Object, F::Error>>>,
    pub(crate) live: LiveChannel<F::Object, F::Error>,
    pub(crate) dead: DeadChannel<F::Object, F::Error>,
    pub(crate) target_size: AtomicUsize,
    pub(crate) shutdown: AtomicBool,
    pub(crate) next_index: AtomicUsize,
    /// Poisoned slots currently in circulation; kept so operators can
    /// see a broken factory in the health output before claims do.
    pub(crate) poisoned_slots: AtomicUsize,
    pub(crate) factory: F,
    pub(crate) expiration: Arc<dyn ExpirationPolicy>,
    pub(crate) metrics: MetricsTracker,
    pub(crate) completion: Arc<CompletionSignal>,
}

/// Outcome of vetting a freshly-CASed claim.
enum Vet<F: ObjectFactory> {
    Ready(Claimed<F>),
    Retry,
    Fail(PoolError<F::Error>),
}

impl<F: ObjectFactory> PoolCore<F> {
    pub(crate) fn new(
        factory: F,
        target: usize,
        expiration: Arc<dyn ExpirationPolicy>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots: DashMap::new(),
            live: LiveChannel::new(),
            dead: DeadChannel::new(),
            target_size: AtomicUsize::new(target),
            shutdown: AtomicBool::new(false),
            next_index: AtomicUsize::new(0),
            poisoned_slots: AtomicUsize::new(0),
            factory,
            expiration,
            metrics: MetricsTracker::default(),
            completion: CompletionSignal::new(),
        })
    }

    pub(crate) fn target(&self) -> usize {
        self.target_size.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn note_poison_cleared(&self) {
        let _ = self
            .poisoned_slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().state() == LIVING)
            .count()
    }

    pub(crate) fn claimed_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value().state(), CLAIMED | TLR_CLAIMED))
            .count()
    }

    fn initiate_shutdown(&self) -> Completion {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!(pool = self.pool_id, "shutdown initiated");
        }
        Completion::new(Arc::clone(&self.completion))
    }

    /// The claim engine. Fast path first, then deadline-bounded polls
    /// of the live channel with per-entry state resolution.
    fn claim(core: &Arc<Self>, timeout: Duration) -> PoolResult<Claimed<F>, F::Error> {
        let deadline = Instant::now().checked_add(timeout);

        if let Some(slot) = tlr::get::<Slot<F::Object, F::Error>>(core.pool_id)
            && slot.live2claim_tlr()
        {
            match Self::vet(core, slot) {
                Vet::Ready(handle) => return Ok(handle),
                Vet::Fail(err) => return Err(err),
                Vet::Retry => {}
            }
        }

        loop {
            if core.is_shutdown() {
                return Err(PoolError::Shutdown);
            }

            let Some(slot) = core.live.poll_until(deadline) else {
                if core.is_shutdown() {
                    return Err(PoolError::Shutdown);
                }
                MetricsTracker::bump(&core.metrics.total_timeouts);
                return Err(PoolError::Timeout(timeout));
            };

            // Resolve the popped entry against the slot's current
            // state. An entry is spent once this loop exits.
            let claimed = loop {
                match slot.state() {
                    LIVING => {
                        if slot.live2claim() {
                            break true;
                        }
                    }
                    TLR_CLAIMED => {
                        // Steal: converting the holder's TLR claim
                        // makes it re-enqueue the slot on release,
                        // compensating for the entry consumed here.
                        if slot.claim_tlr2claim() {
                            break false;
                        }
                    }
                    _ => break false, // stale: claimed elsewhere or dead
                }
            };
            if !claimed {
                continue;
            }

            match Self::vet(core, slot) {
                Vet::Ready(handle) => return Ok(handle),
                Vet::Fail(err) => return Err(err),
                Vet::Retry => continue,
            }
        }
    }

    /// Steps 4-7 of a claim, run while owning the slot: surface
    /// poison, apply expiration, honor shutdown, then hand out the
    /// object.
    fn vet(core: &Arc<Self>, slot: Arc<Slot<F::Object, F::Error>>) -> Vet<F> {
        // SAFETY: the caller just CASed the slot to CLAIMED or
        // TLR_CLAIMED, so this thread owns its metadata.
        if let Some(cause) = unsafe { slot.take_poison() } {
            core.note_poison_cleared();
            tlr::clear_if(core.pool_id, &slot);
            core.kill_owned(&slot);
            MetricsTracker::bump(&core.metrics.poisoned_claims);
            return Vet::Fail(PoolError::Poisoned(cause));
        }

        // A fresh allocation is handed out as-is; the policy only
        // judges objects that have been claimed before. Anything else
        // would let an aggressive policy starve the pool by retiring
        // replacements on sight.
        if unsafe { slot.claim_count() } > 0 {
            let expired = {
                let mut info = unsafe { slot.info() };
                core.expiration.has_expired(&mut info)
            };
            if expired {
                MetricsTracker::bump(&core.metrics.expired_objects);
                core.kill_owned(&slot);
                return Vet::Retry;
            }
        }

        if core.is_shutdown() {
            core.kill_owned(&slot);
            return Vet::Fail(PoolError::Shutdown);
        }

        unsafe { slot.increment_claims() };
        MetricsTracker::bump(&core.metrics.total_claims);
        tlr::put(core.pool_id, &slot);
        Vet::Ready(Claimed {
            core: Arc::clone(core),
            slot,
            expired: false,
            _object: PhantomData,
        })
    }

    /// Retire a slot this thread owns, whichever claim flavour holds
    /// it, and hand it to the allocator.
    fn kill_owned(&self, slot: &Arc<Slot<F::Object, F::Error>>) {
        loop {
            match slot.state() {
                CLAIMED => {
                    if slot.claim2dead() {
                        break;
                    }
                }
                TLR_CLAIMED => {
                    // Fold into an ordinary claim first; a concurrent
                    // steal performs the same conversion for us.
                    let _ = slot.claim_tlr2claim();
                }
                state => panic!("slot {} retired from bad state {state}", slot.index()),
            }
        }
        self.dead.push(Arc::clone(slot));
    }

    /// The release protocol. Re-reads the state because a TLR claim
    /// can be concurrently stolen into an ordinary one.
    fn release(&self, slot: &Arc<Slot<F::Object, F::Error>>, retire: bool) {
        MetricsTracker::bump(&self.metrics.total_releases);
        let retire = retire || self.is_shutdown();
        loop {
            match slot.state() {
                TLR_CLAIMED => {
                    if retire {
                        // Take the ordinary path below.
                        let _ = slot.claim_tlr2claim();
                    } else if slot.claim_tlr2live() {
                        // Still cached on this thread; the live-channel
                        // entry from before the TLR claim still stands.
                        return;
                    }
                    // Stolen mid-release; re-read.
                }
                CLAIMED => {
                    if retire {
                        self.kill_owned(slot);
                    } else {
                        slot.claim2live();
                        self.live.push(Arc::clone(slot));
                    }
                    return;
                }
                state => panic!("slot {} released from bad state {state}", slot.index()),
            }
        }
    }
}

/// A bounded, thread-safe pool of reusable objects.
///
/// Claimers borrow an object for exclusive use and return it on drop;
/// a dedicated allocator thread builds, retires, and replaces objects
/// in the background, so `claim` never pays construction cost for an
/// object that is already live.
///
/// The pool is not fair: when several threads wait out a depleted
/// pool, wakeup order is unspecified.
///
/// # Examples
///
/// ```
/// use slotpool::{ObjectFactory, Pool, PoolConfig, SlotInfo};
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// struct Buffers;
/// impl ObjectFactory for Buffers {
///     type Object = Vec<u8>;
///     type Error = Infallible;
///     fn create(&self, _slot: &mut SlotInfo<'_>) -> Result<Vec<u8>, Infallible> {
///         Ok(vec![0; 4096])
///     }
/// }
///
/// let pool = Pool::new(Buffers, PoolConfig::new().with_size(4)).unwrap();
/// let mut buffer = pool.claim(Duration::from_secs(1)).unwrap();
/// buffer[0] = 7;
/// // Returned to the pool here.
/// drop(buffer);
/// ```
pub struct Pool<F: ObjectFactory> {
    core: Arc<PoolCore<F>>,
    allocator: Option<thread::JoinHandle<()>>,
}

impl<F: ObjectFactory> Pool<F> {
    /// Build a pool and start its allocator worker.
    ///
    /// Returns [`PoolError::Structural`] when the configured size is
    /// zero or the allocator thread cannot be spawned.
    pub fn new(factory: F, config: PoolConfig) -> PoolResult<Self, F::Error> {
        if config.size < 1 {
            return Err(PoolError::Structural("pool size must be at least 1"));
        }

        let core = PoolCore::new(factory, config.size, Arc::clone(&config.expiration));
        let worker = Arc::clone(&core);
        let allocator = match &config.background_scheduler {
            BackgroundScheduler::DedicatedThread => {
                let handle = thread::Builder::new()
                    .name(config.allocator_thread_name.clone())
                    .spawn(move || alloc::run(worker))
                    .map_err(|_| PoolError::Structural("failed to spawn allocator thread"))?;
                Some(handle)
            }
            BackgroundScheduler::Custom(spawn) => {
                spawn(Box::new(move || alloc::run(worker)));
                None
            }
        };

        Ok(Self { core, allocator })
    }

    /// Claim exclusive use of one object, waiting up to `timeout` for
    /// the pool to become non-empty.
    ///
    /// Failure modes: [`PoolError::Timeout`] when the deadline passes
    /// with nothing claimable, [`PoolError::Poisoned`] when the
    /// claimed slot carried a captured allocation failure (the slot is
    /// already queued for background retry; claim again), and
    /// [`PoolError::Shutdown`] once [`Pool::shutdown`] has been
    /// called. A poisoned result consumes the attempt: the remaining
    /// timeout is not spent retrying internally.
    pub fn claim(&self, timeout: Duration) -> PoolResult<Claimed<F>, F::Error> {
        PoolCore::claim(&self.core, timeout)
    }

    /// Non-blocking claim.
    pub fn try_claim(&self) -> Option<Claimed<F>> {
        PoolCore::claim(&self.core, Duration::ZERO).ok()
    }

    /// Claim from async code, without tying up the runtime worker for
    /// the full wait.
    pub async fn claim_async(&self, timeout: Duration) -> PoolResult<Claimed<F>, F::Error> {
        tokio::time::timeout(timeout, async {
            loop {
                match PoolCore::claim(&self.core, Duration::ZERO) {
                    Ok(handle) => return Ok(handle),
                    Err(PoolError::Timeout(_)) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(other) => return Err(other),
                }
            }
        })
        .await
        .map_err(|_| PoolError::Timeout(timeout))?
    }

    /// Change the size the pool converges toward. Growth is bounded by
    /// factory throughput; shrinking waits for holders to release.
    /// Returns immediately either way.
    pub fn set_target_size(&self, size: usize) -> PoolResult<(), F::Error> {
        if size < 1 {
            return Err(PoolError::Structural("pool size must be at least 1"));
        }
        self.core.target_size.store(size, Ordering::Release);
        Ok(())
    }

    pub fn current_target_size(&self) -> usize {
        self.core.target()
    }

    /// Slots live and claimable right now.
    pub fn live_count(&self) -> usize {
        self.core.live_count()
    }

    /// Slots currently held by claimers.
    pub fn claimed_count(&self) -> usize {
        self.core.claimed_count()
    }

    /// Slots existing in any state.
    pub fn capacity(&self) -> usize {
        self.core.slots.len()
    }

    /// Begin shutting the pool down. Idempotent and non-blocking; the
    /// returned handle completes once every slot has been destroyed
    /// and the allocator has exited. A claimed object that is never
    /// released blocks completion indefinitely.
    pub fn shutdown(&self) -> Completion {
        self.core.initiate_shutdown()
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        self.core.metrics.snapshot(
            self.core.live_count(),
            self.core.claimed_count(),
            self.core.poisoned_slots.load(Ordering::Acquire),
            self.core.slots.len(),
            self.core.target(),
        )
    }

    /// Export metrics as a string map.
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in the Prometheus exposition format.
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }

    /// Health snapshot.
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::new(
            self.core.live_count(),
            self.core.claimed_count(),
            self.core.slots.len(),
            self.core.target(),
        )
    }
}

impl<F: ObjectFactory> Drop for Pool<F> {
    fn drop(&mut self) {
        // The allocator holds its own reference to the core; flag it
        // down so the thread exits even without an explicit shutdown.
        self.core.initiate_shutdown();
        if let Some(handle) = self.allocator.take() {
            drop(handle); // detached; completion is the join signal
        }
    }
}

/// Exclusive use of one pooled object, returned on drop.
///
/// Dereferences to the object. Use [`Claimed::mark_expired`] to have
/// the object retired instead of recycled when the handle goes away.
pub struct Claimed<F: ObjectFactory> {
    core: Arc<PoolCore<F>>,
    slot: Arc<Slot<F::Object, F::Error>>,
    expired: bool,
    /// Ties this handle's auto-traits to the object it lends out.
    _object: PhantomData<F::Object>,
}

impl<F: ObjectFactory> Claimed<F> {
    /// Return the object to the pool. Equivalent to dropping the
    /// handle; provided for call sites that want the return explicit.
    pub fn release(self) {
        drop(self);
    }

    /// Have the object retired at release instead of recycled. The
    /// allocator replaces it in the background.
    pub fn mark_expired(&mut self) {
        self.expired = true;
    }

    pub fn is_marked_expired(&self) -> bool {
        self.expired
    }

    /// Successful claims of this object, this one included.
    pub fn claim_count(&self) -> u64 {
        // SAFETY: this handle owns the slot.
        unsafe { self.slot.claim_count() }
    }

    /// Age of the object since its allocation.
    pub fn age(&self) -> Duration {
        // SAFETY: this handle owns the slot.
        unsafe { self.slot.info() }.age()
    }

    /// Index of the underlying slot; stable across reallocations.
    pub fn slot_index(&self) -> usize {
        self.slot.index()
    }
}

impl<F: ObjectFactory> Deref for Claimed<F> {
    type Target = F::Object;

    fn deref(&self) -> &F::Object {
        // SAFETY: this handle owns the slot.
        unsafe { self.slot.object_ref() }.expect("claimed slot has no object")
    }
}

impl<F: ObjectFactory> DerefMut for Claimed<F> {
    fn deref_mut(&mut self) -> &mut F::Object {
        // SAFETY: this handle owns the slot, exclusively via &mut self.
        unsafe { self.slot.object_mut() }.expect("claimed slot has no object")
    }
}

impl<F: ObjectFactory> Drop for Claimed<F> {
    fn drop(&mut self) {
        if self.expired {
            MetricsTracker::bump(&self.core.metrics.expired_objects);
        }
        self.core.release(&self.slot, self.expired);
    }
}
