//! Model-version invalidation propagation.
//!
//! [`InvalidationBus`] carries [`InvalidationEvent`]s from the backend's
//! deployment lifecycle to the [`PredictionCache`]. It is a thin wrapper
//! over a tokio broadcast channel: deployment tooling calls
//! [`publish`](InvalidationBus::publish), and an apply task (spawned at
//! controller startup) drives [`PredictionCache::invalidate`] for each
//! event.
//!
//! The cache's lazy per-read version check remains the primary staleness
//! guarantee; the bus exists so memory is reclaimed eagerly and so other
//! subscribers (warmers, dashboards) can observe deployments. A lagged
//! subscriber therefore loses nothing but the eager sweep.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::cache::PredictionCache;
use crate::types::InvalidationEvent;

/// Default broadcast capacity. Deployments are rare events; 64 outstanding
/// is already generous.
const DEFAULT_CAPACITY: usize = 64;

/// Fan-out channel for model version changes.
pub struct InvalidationBus {
    tx: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a version change to all subscribers.
    ///
    /// Returns the number of subscribers that received the event. Zero
    /// means no apply task is running; the event is dropped (and the lazy
    /// read check still protects cache consumers).
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        let model = event.model.clone();
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(model = %model, "invalidation event dropped, no subscribers");
                0
            }
        }
    }

    /// Subscribe to raw events (for warmers, dashboards, tests).
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.tx.subscribe()
    }

    /// Spawn the task that applies events to the cache.
    ///
    /// Runs until the bus is dropped or `shutdown` flips to true.
    pub(crate) fn spawn_apply(
        &self,
        cache: Arc<PredictionCache>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => {
                            cache.invalidate(&event.model, event.version);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Skipped events only delay the eager sweep;
                            // reads stay correct via the lazy check.
                            warn!(missed, "invalidation apply task lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}
