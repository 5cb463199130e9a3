use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct GateState {
    in_flight: Mutex<usize>,
    released: Condvar,
}

impl GateState {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Bounds the number of dispatches that are submitted but not yet complete.
#[derive(Clone)]
pub struct AdmissionGate {
    state: Arc<GateState>,
    limit: usize,
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(GateState {
                in_flight: Mutex::new(0),
                released: Condvar::new(),
            }),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        *self.state.lock()
    }

    // Blocks until a slot is free.
    pub fn acquire(&self) -> Permit {
        let mut in_flight = self.state.lock();
        while *in_flight >= self.limit {
            in_flight = self
                .state
                .released
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;
        Permit {
            state: Arc::clone(&self.state),
        }
    }
}

#[must_use = "if unused the Permit will immediately release its slot"]
pub struct Permit {
    state: Arc<GateState>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut in_flight = self.state.lock();
        *in_flight -= 1;
        self.state.released.notify_one();
    }
}
