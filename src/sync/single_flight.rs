//! Single-flight: concurrent callers share one in-flight computation.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;

type Flight<T> = Shared<BoxFuture<'static, T>>;

#[derive(Debug)]
struct Slot<T: Clone> {
    generation: u64,
    flight: Option<Flight<T>>,
}

/// Runs at most one computation at a time; callers arriving while it runs
/// await the same result instead of starting another.
pub struct SingleFlight<T: Clone> {
    slot: Mutex<Slot<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                flight: None,
            }),
        }
    }

    /// Join the in-flight computation, or start `start()` if there is none.
    pub async fn run<F, Fut>(&self, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (generation, flight) = {
            let mut slot = self.slot.lock();
            match &slot.flight {
                Some(flight) => (slot.generation, flight.clone()),
                None => {
                    slot.generation += 1;
                    let flight = start().boxed().shared();
                    slot.flight = Some(flight.clone());
                    (slot.generation, flight)
                }
            }
        };

        let out = flight.await;

        // First finisher clears the slot; a newer flight is left alone.
        let mut slot = self.slot.lock();
        if slot.generation == generation {
            slot.flight = None;
        }
        out
    }

    pub fn in_flight(&self) -> bool {
        self.slot.lock().flight.is_some()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("SingleFlight")
            .field("generation", &slot.generation)
            .field("in_flight", &slot.flight.is_some())
            .finish()
    }
}
