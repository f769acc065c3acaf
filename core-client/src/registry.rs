//! In-flight request registry
//!
//! Maps correlation ids to cancellation tokens. Registering an id that is
//! already in flight cancels the earlier request, so at most one live call
//! exists per id. The returned [`InFlight`] guard deregisters on drop, which
//! covers every exit path including a dropped request future.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Registration {
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<HashMap<String, Registration>>,
    next_generation: AtomicU64,
}

/// Registry of cancellable in-flight requests.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<RegistryInner>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `request_id`, cancelling any request already using it.
    pub fn register(&self, request_id: &str) -> InFlight {
        let token = CancellationToken::new();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let previous = self.lock().insert(
            request_id.to_string(),
            Registration {
                token: token.clone(),
                generation,
            },
        );

        if let Some(previous) = previous {
            debug!(request_id, "Cancelling superseded request");
            previous.token.cancel();
        }

        InFlight {
            registry: self.clone(),
            request_id: request_id.to_string(),
            generation,
            token,
        }
    }

    /// Cancels one request. Returns `false` if it is not in flight.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.lock().remove(request_id) {
            Some(registration) => {
                registration.token.cancel();
                debug!(request_id, "Request cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight request and returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Registration> = self.lock().drain().map(|(_, r)| r).collect();
        for registration in &drained {
            registration.token.cancel();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cancelled all in-flight requests");
        }
        drained.len()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, request_id: &str, generation: u64) {
        let mut entries = self.lock();
        if entries
            .get(request_id)
            .is_some_and(|r| r.generation == generation)
        {
            entries.remove(request_id);
        }
    }
}

/// Registration guard for one request.
pub struct InFlight {
    registry: InFlightRegistry,
    request_id: String,
    generation: u64,
    token: CancellationToken,
}

impl InFlight {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.registry.release(&self.request_id, self.generation);
    }
}
