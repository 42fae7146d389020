use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

/// Collapses concurrent calls for the same key into one execution.
///
/// The first caller for a key runs its future; callers that arrive while it
/// is in flight wait and receive a clone of the same result. Once the flight
/// lands the key is released, so a later call runs again.
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` unless a flight for `key` is already underway, in which
    /// case `work` is dropped unpolled and the running flight's result is
    /// returned.
    pub async fn run<F>(&self, key: &str, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let (cell, joined) = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            match flights.get(key) {
                Some(cell) => (Arc::clone(cell), true),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    flights.insert(key.to_string(), Arc::clone(&cell));
                    (cell, false)
                }
            }
        };

        if joined {
            metrics::counter!("single_flight_joined").increment(1);
        }

        let value = cell.get_or_init(|| work).await.clone();

        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            flights.remove(key);
        }

        value
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
