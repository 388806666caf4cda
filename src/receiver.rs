//! Host receipt and persistence
//!
//! Listens for inbound data items on the phone, decodes HRV datagrams, and
//! writes one entry per datagram into the health-record store. Each datagram
//! is persisted once in its own task; failures are logged and the datagram is
//! dropped.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::observer::{Observers, RelayEvent};
use crate::store::HealthRecordStore;
use crate::transport::{DataItem, Inbound, PeerId, PING_PATH};
use crate::types::{HrvEntry, HrvReceipt};

/// Phone-side receiver for wearable datagrams
#[derive(Clone)]
pub struct HostReceiver {
    store: Arc<dyn HealthRecordStore>,
    path: String,
    observers: Observers,
}

impl HostReceiver {
    pub fn new(store: Arc<dyn HealthRecordStore>, config: &RelayConfig) -> Self {
        Self {
            store,
            path: config.transport.path.clone(),
            observers: Observers::new(),
        }
    }

    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Handle one inbound item.
    ///
    /// Returns the persistence task for HRV datagrams, `None` for anything
    /// else (other paths, undecodable payloads).
    pub fn on_data_item(&self, from: PeerId, item: DataItem) -> Option<JoinHandle<()>> {
        let receipt = match item.decode_at::<HrvReceipt>(&self.path) {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                if item.path == PING_PATH {
                    log::info!(
                        "Connectivity ping from {}: {}",
                        from,
                        String::from_utf8_lossy(&item.payload)
                    );
                } else {
                    log::debug!("Ignoring {} from {}", item.path, from);
                }
                return None;
            }
            Err(e) => {
                log::warn!("Dropping malformed {} from {}: {}", item.path, from, e);
                return None;
            }
        };

        log::info!(
            "Received HRV from {}: RMSSD={}, time={}",
            from,
            receipt.rmssd,
            receipt.timestamp
        );

        let receiver = self.clone();
        Some(tokio::spawn(async move {
            // outcome already logged and published
            let _ = receiver.persist(&receipt).await;
        }))
    }

    /// Persist one datagram as a manually-entered HRV entry
    pub async fn persist(&self, receipt: &HrvReceipt) -> Result<HrvEntry, RelayError> {
        let result: Result<HrvEntry, RelayError> = async {
            let entry = HrvEntry::from_receipt(receipt)?;
            self.store.insert_hrv(vec![entry.clone()]).await?;
            Ok(entry)
        }
        .await;

        match &result {
            Ok(entry) => {
                log::info!("Stored HRV entry (RMSSD: {})", entry.rmssd_ms);
                self.observers.notify(RelayEvent::Persisted(entry.clone()));
            }
            Err(e) => {
                log::error!("Failed to store HRV entry: {}", e);
                self.observers.notify(RelayEvent::PersistFailed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Process an inbox until its senders are gone
    pub fn spawn(self, mut inbox: mpsc::Receiver<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((from, item)) = inbox.recv().await {
                self.on_data_item(from, item);
            }
            log::info!("Host receiver inbox closed");
        })
    }
}
