//! Basic usage: claim, use, release

use slotpool::{ObjectFactory, Pool, PoolConfig, SlotInfo};
use std::convert::Infallible;
use std::time::Duration;

struct Connection {
    id: usize,
    queries: usize,
}

struct ConnectionFactory;

impl ObjectFactory for ConnectionFactory {
    type Object = Connection;
    type Error = Infallible;

    fn create(&self, slot: &mut SlotInfo<'_>) -> Result<Connection, Infallible> {
        println!("  [factory] opening connection for slot {}", slot.index());
        Ok(Connection {
            id: slot.index(),
            queries: 0,
        })
    }

    fn destroy(&self, connection: Connection) {
        println!(
            "  [factory] closing connection {} after {} queries",
            connection.id, connection.queries
        );
    }
}

fn main() {
    println!("=== slotpool - Basic Usage ===\n");

    let pool = Pool::new(ConnectionFactory, PoolConfig::new().with_size(3)).unwrap();

    // Claim, use, and let the handle return the object on drop.
    for round in 0..3 {
        let mut conn = pool.claim(Duration::from_secs(1)).unwrap();
        conn.queries += 1;
        println!(
            "round {}: connection {} has served {} queries (claim #{})",
            round,
            conn.id,
            conn.queries,
            conn.claim_count()
        );
    }

    println!("\nlive: {}, claimed: {}", pool.live_count(), pool.claimed_count());

    // Shut down and wait for every connection to be closed.
    let completion = pool.shutdown();
    let drained = completion.await_done(Duration::from_secs(5));
    println!("shutdown complete: {drained}");
}
