//! # slotpool
//!
//! Bounded, thread-safe object pool for expensive-to-construct
//! resources, with all allocation pushed off the claim path onto a
//! background worker.
//!
//! ## Features
//!
//! - Lock-free claim/release over a per-slot state machine
//! - Dedicated allocator thread: construction, destruction, and retry
//!   never run on a claiming thread
//! - Thread-local reuse fast path for uncontended repeat claims
//! - Factory failures captured and surfaced as poisoned claims, with
//!   automatic background retry
//! - Time-spread expiration to de-synchronise object end-of-life
//! - Dynamic resizing toward an adjustable target size
//! - Non-blocking, idempotent shutdown with an awaitable completion
//!   handle
//! - Async claim support with timeout
//! - Metrics snapshot with Prometheus export, health monitoring
//!
//! ## Quick Start
//!
//! ```rust
//! use slotpool::{ObjectFactory, Pool, PoolConfig, SlotInfo};
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! struct Connections;
//!
//! impl ObjectFactory for Connections {
//!     type Object = String;
//!     type Error = Infallible;
//!
//!     fn create(&self, slot: &mut SlotInfo<'_>) -> Result<String, Infallible> {
//!         Ok(format!("connection-{}", slot.index()))
//!     }
//! }
//!
//! let pool = Pool::new(Connections, PoolConfig::new().with_size(4)).unwrap();
//! {
//!     let conn = pool.claim(Duration::from_secs(1)).unwrap();
//!     println!("Got: {}", *conn);
//!     // Object automatically returned when `conn` goes out of scope
//! }
//! pool.shutdown().await_done(Duration::from_secs(1));
//! ```

mod alloc;
mod channel;
mod completion;
mod config;
mod errors;
mod expiration;
mod factory;
mod health;
mod metrics;
mod pool;
mod slot;
mod tlr;

pub use completion::Completion;
pub use config::{BackgroundScheduler, PoolConfig};
pub use errors::{PoolError, PoolResult};
pub use expiration::{ExpirationPolicy, MaxAge, NeverExpire, TimeSpread};
pub use factory::ObjectFactory;
pub use health::HealthStatus;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::{Claimed, Pool};
pub use slot::SlotInfo;
