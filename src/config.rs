//! Pool configuration options

use std::fmt;
use std::sync::Arc;

use crate::expiration::{ExpirationPolicy, TimeSpread};

/// Where the pool's allocator worker runs.
#[derive(Clone, Default)]
pub enum BackgroundScheduler {
    /// One dedicated thread per pool. The default.
    #[default]
    DedicatedThread,
    /// Hand the allocator loop to caller-owned infrastructure (a
    /// shared worker pool, a test harness). The closure receives the
    /// loop body and must run it to completion exactly once.
    Custom(Arc<dyn Fn(Box<dyn FnOnce() + Send + 'static>) + Send + Sync>),
}

impl fmt::Debug for BackgroundScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundScheduler::DedicatedThread => f.write_str("DedicatedThread"),
            BackgroundScheduler::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Configuration for pool behavior.
///
/// # Examples
///
/// ```
/// use slotpool::{PoolConfig, TimeSpread};
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_size(32)
///     .with_expiration(TimeSpread::new(
///         Duration::from_secs(300),
///         Duration::from_secs(420),
///     ))
///     .with_allocator_thread_name("db-pool-allocator");
///
/// assert_eq!(config.size, 32);
/// ```
#[derive(Clone)]
pub struct PoolConfig {
    /// Initial target size; must be at least 1.
    pub size: usize,

    /// Policy deciding when a slot's object is retired.
    pub expiration: Arc<dyn ExpirationPolicy>,

    /// Name given to the allocator thread, cosmetic.
    pub allocator_thread_name: String,

    /// Where the allocator loop runs.
    pub background_scheduler: BackgroundScheduler,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("size", &self.size)
            .field("allocator_thread_name", &self.allocator_thread_name)
            .field("background_scheduler", &self.background_scheduler)
            .finish_non_exhaustive()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            expiration: Arc::new(TimeSpread::default()),
            allocator_thread_name: "slotpool-allocator".to_string(),
            background_scheduler: BackgroundScheduler::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values: size 10, time-spread
    /// expiration at 8-10 minutes, a dedicated allocator thread.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial target size.
    ///
    /// # Examples
    ///
    /// ```
    /// use slotpool::PoolConfig;
    ///
    /// let config = PoolConfig::new().with_size(4);
    /// assert_eq!(config.size, 4);
    /// ```
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the expiration policy.
    pub fn with_expiration(mut self, policy: impl ExpirationPolicy) -> Self {
        self.expiration = Arc::new(policy);
        self
    }

    /// Name the allocator thread.
    pub fn with_allocator_thread_name(mut self, name: impl Into<String>) -> Self {
        self.allocator_thread_name = name.into();
        self
    }

    /// Run the allocator loop on caller-owned infrastructure instead
    /// of a dedicated thread.
    pub fn with_background_scheduler(mut self, scheduler: BackgroundScheduler) -> Self {
        self.background_scheduler = scheduler;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::NeverExpire;

    #[test]
    fn defaults_match_the_documented_set() {
        let config = PoolConfig::default();
        assert_eq!(config.size, 10);
        assert_eq!(config.allocator_thread_name, "slotpool-allocator");
        assert!(matches!(
            config.background_scheduler,
            BackgroundScheduler::DedicatedThread
        ));
    }

    #[test]
    fn builders_compose() {
        let config = PoolConfig::new()
            .with_size(3)
            .with_expiration(NeverExpire)
            .with_allocator_thread_name("test-allocator");
        assert_eq!(config.size, 3);
        assert_eq!(config.allocator_thread_name, "test-allocator");
    }
}
