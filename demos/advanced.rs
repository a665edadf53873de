//! Advanced features: poisoning, expiration, resizing, metrics

use slotpool::{ObjectFactory, Pool, PoolConfig, PoolError, SlotInfo, TimeSpread};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Fails its first few calls, like a backend that is briefly down.
struct FlakyFactory {
    attempts: AtomicUsize,
    failures: usize,
}

impl ObjectFactory for FlakyFactory {
    type Object = String;
    type Error = io::Error;

    fn create(&self, slot: &mut SlotInfo<'_>) -> Result<String, io::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "backend down"));
        }
        Ok(format!("session-{}", slot.index()))
    }
}

fn main() {
    println!("=== slotpool - Advanced Features ===\n");

    poisoned_claims();
    expiration_spread();
    resizing();
    prometheus_export();
}

fn poisoned_claims() {
    println!("1. Poisoned claims and proactive recovery:");

    let pool = Pool::new(
        FlakyFactory {
            attempts: AtomicUsize::new(0),
            failures: 2,
        },
        PoolConfig::new().with_size(2),
    )
    .unwrap();

    loop {
        match pool.claim(Duration::from_secs(1)) {
            Ok(session) => {
                println!("   recovered: {}", *session);
                break;
            }
            Err(PoolError::Poisoned(cause)) => {
                println!("   claim surfaced factory failure: {cause}");
            }
            Err(other) => {
                println!("   unexpected: {other}");
                break;
            }
        }
    }

    println!();
}

fn expiration_spread() {
    println!("2. Time-spread expiration:");

    // Sessions live 50-100ms; the jitter keeps replacements staggered.
    let pool = Pool::new(
        FlakyFactory {
            attempts: AtomicUsize::new(0),
            failures: 0,
        },
        PoolConfig::new()
            .with_size(2)
            .with_expiration(TimeSpread::new(
                Duration::from_millis(50),
                Duration::from_millis(100),
            )),
    )
    .unwrap();

    let first = pool.claim(Duration::from_secs(1)).unwrap();
    println!("   first claim:  {} (claim #{})", *first, first.claim_count());
    drop(first);

    thread::sleep(Duration::from_millis(150));

    let second = pool.claim(Duration::from_secs(1)).unwrap();
    println!("   after expiry: {} (claim #{})", *second, second.claim_count());

    println!();
}

fn resizing() {
    println!("3. Dynamic resizing:");

    let pool = Arc::new(
        Pool::new(
            FlakyFactory {
                attempts: AtomicUsize::new(0),
                failures: 0,
            },
            PoolConfig::new().with_size(2),
        )
        .unwrap(),
    );

    wait_for(&pool, 2);
    println!("   initial live slots: {}", pool.live_count());

    pool.set_target_size(6).unwrap();
    wait_for(&pool, 6);
    println!("   after grow to 6:   {}", pool.live_count());

    pool.set_target_size(3).unwrap();
    while pool.capacity() > 3 {
        thread::sleep(Duration::from_millis(10));
    }
    println!("   after shrink to 3: {}", pool.capacity());

    println!();
}

fn prometheus_export() {
    println!("4. Prometheus metrics export:");

    let pool = Pool::new(
        FlakyFactory {
            attempts: AtomicUsize::new(0),
            failures: 0,
        },
        PoolConfig::new().with_size(3),
    )
    .unwrap();

    let _held = pool.claim(Duration::from_secs(1)).unwrap();

    let mut tags = HashMap::new();
    tags.insert("service".to_string(), "demo".to_string());
    print!("{}", pool.export_metrics_prometheus("demo_pool", Some(&tags)));
}

fn wait_for(pool: &Pool<FlakyFactory>, live: usize) {
    while pool.live_count() < live {
        thread::sleep(Duration::from_millis(10));
    }
}
