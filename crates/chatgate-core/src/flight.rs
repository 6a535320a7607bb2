use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use chatgate_protocol::GatewayError;

struct Flight {
    held_since: Instant,
    generation: u64,
}

#[derive(Default)]
struct Table {
    slots: HashMap<String, Flight>,
    next_generation: u64,
}

type SharedTable = Arc<Mutex<Table>>;

/// Per-client single-flight lock. A second concurrent call is rejected, not
/// enqueued; a holder older than the stale threshold is force-released so a
/// wedged client can never lock itself out permanently. Each acquisition
/// carries a generation token so a stolen guard's release cannot evict the
/// holder that replaced it.
#[derive(Clone)]
pub struct FlightMap {
    table: SharedTable,
    stale_after: Duration,
}

impl FlightMap {
    pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

    pub fn new(stale_after: Duration) -> Self {
        Self { table: Arc::new(Mutex::new(Table::default())), stale_after }
    }

    pub fn acquire(&self, client: &str) -> Result<FlightGuard, GatewayError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = table.slots.get(client) {
            if flight.held_since.elapsed() < self.stale_after {
                return Err(GatewayError::RateLimited(
                    "a request is already in flight for this client".to_string(),
                ));
            }
            warn!(client, "force-releasing stale in-flight lock");
        }
        let generation = table.next_generation;
        table.next_generation += 1;
        table
            .slots
            .insert(client.to_string(), Flight { held_since: Instant::now(), generation });
        Ok(FlightGuard {
            table: self.table.clone(),
            client: client.to_string(),
            generation,
        })
    }
}

impl Default for FlightMap {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STALE_AFTER)
    }
}

/// Releases the slot on drop, on every exit path. The release is skipped
/// when the slot has since been stolen by a newer acquisition.
pub struct FlightGuard {
    table: SharedTable,
    client: String,
    generation: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .slots
            .get(&self.client)
            .is_some_and(|flight| flight.generation == self.generation)
        {
            table.slots.remove(&self.client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_while_held() {
        let flights = FlightMap::default();
        let guard = flights.acquire("client-a").unwrap();
        assert!(matches!(
            flights.acquire("client-a"),
            Err(GatewayError::RateLimited(_))
        ));
        // A different client is unaffected.
        flights.acquire("client-b").unwrap();
        drop(guard);
        flights.acquire("client-a").unwrap();
    }

    #[test]
    fn drop_releases_on_any_path() {
        let flights = FlightMap::default();
        {
            let _guard = flights.acquire("client-a").unwrap();
        }
        flights.acquire("client-a").unwrap();
    }

    #[test]
    fn stale_lock_is_stolen() {
        let flights = FlightMap::new(Duration::from_millis(0));
        let _guard = flights.acquire("client-a").unwrap();
        // Zero threshold makes the first holder immediately stale.
        let _second = flights.acquire("client-a").unwrap();
    }

    #[test]
    fn stolen_guard_cannot_release_the_new_holder() {
        let flights = FlightMap::new(Duration::from_millis(10));
        let stale = flights.acquire("client-a").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let _current = flights.acquire("client-a").unwrap();

        // The stale guard's release must not evict the new holder's slot.
        drop(stale);
        assert!(matches!(
            flights.acquire("client-a"),
            Err(GatewayError::RateLimited(_))
        ));

        drop(_current);
        flights.acquire("client-a").unwrap();
    }
}
