//! Relay event observers
//!
//! Foreground contexts (a watch screen, the phone UI) register an observer for
//! as long as they are alive and deregister when they go away. Background work
//! publishes events to whoever is registered at that moment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::sampler::SamplerState;
use crate::transport::TransmitReport;
use crate::types::{HrvEntry, HrvResult};

/// Events published by the sampler and the host receiver
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    StateChanged(SamplerState),
    Measured(HrvResult),
    /// A window closed with too few intervals
    Skipped { sample_count: usize },
    Transmitted(TransmitReport),
    Persisted(HrvEntry),
    PersistFailed { message: String },
}

/// Receiver of relay events
pub trait RelayObserver: Send + Sync {
    fn on_event(&self, event: &RelayEvent);
}

impl<F> RelayObserver for F
where
    F: Fn(&RelayEvent) + Send + Sync,
{
    fn on_event(&self, event: &RelayEvent) {
        self(event)
    }
}

/// Handle returned on registration, used to deregister
pub type ObserverId = Uuid;

/// Shared registry of live observers
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<Mutex<HashMap<ObserverId, Arc<dyn RelayObserver>>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry guard, recovered if a previous holder panicked
    fn map(&self) -> MutexGuard<'_, HashMap<ObserverId, Arc<dyn RelayObserver>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, observer: Arc<dyn RelayObserver>) -> ObserverId {
        let id = Uuid::new_v4();
        self.map().insert(id, observer);
        id
    }

    /// Returns whether an observer was registered under `id`
    pub fn deregister(&self, id: &ObserverId) -> bool {
        self.map().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: RelayEvent) {
        // Snapshot so observers run without holding the lock
        let observers: Vec<Arc<dyn RelayObserver>> = self.map().values().cloned().collect();
        for observer in observers {
            observer.on_event(&event);
        }
    }
}
