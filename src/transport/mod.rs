//! Wearable-to-phone transport
//!
//! Results travel as single key-value data items addressed by a logical path.
//! Delivery is best-effort: each connected peer gets one enqueue attempt bounded
//! by a timeout, failures are logged and not retried, and no end-to-end
//! acknowledgement is awaited.

pub mod simulated;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::RelayError;
use crate::types::HrvDatagram;

pub use simulated::{SimDataLayer, SimNode};

/// Logical path of HRV datagrams
pub const HRV_DATA_PATH: &str = "/hrv_data";

/// Logical path of connectivity probes
pub const PING_PATH: &str = "/test_path";

/// Per-peer bound on waiting for local enqueue
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifier of a node on the data layer
pub type PeerId = Uuid;

/// Item as received by a node, tagged with the sender
pub type Inbound = (PeerId, DataItem);

/// One datagram on the data layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub path: String,
    pub payload: Vec<u8>,
}

impl DataItem {
    /// Serialize a value as the JSON payload of a data item at `path`
    pub fn encode<T: Serialize>(path: &str, value: &T) -> Result<Self, RelayError> {
        Ok(Self {
            path: path.to_string(),
            payload: serde_json::to_vec(value)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RelayError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn hrv(datagram: &HrvDatagram) -> Result<Self, RelayError> {
        Self::encode(HRV_DATA_PATH, datagram)
    }

    /// Decode the payload if the item is on `path`; `Ok(None)` otherwise
    pub fn decode_at<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, RelayError> {
        if self.path != path {
            return Ok(None);
        }
        self.decode().map(Some)
    }

    /// Decode as an HRV datagram sent on `path`
    pub fn as_hrv(&self, path: &str) -> Result<Option<HrvDatagram>, RelayError> {
        self.decode_at(path)
    }
}

/// Reliable key-value datagram channel between paired devices
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Peers reachable right now
    async fn connected_peers(&self) -> Result<Vec<PeerId>, RelayError>;

    /// Enqueue an item for one peer; completes once the item is queued locally.
    async fn put(&self, peer: &PeerId, item: DataItem) -> Result<(), RelayError>;
}

/// Per-transmission delivery counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitReport {
    pub path: String,
    pub delivered: usize,
    pub failed: usize,
}

impl TransmitReport {
    pub fn peers(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Send one item to every connected peer, best effort
pub async fn transmit<C>(channel: &C, item: DataItem, timeout: Duration) -> TransmitReport
where
    C: DataChannel + ?Sized,
{
    let mut report = TransmitReport {
        path: item.path.clone(),
        ..Default::default()
    };

    let peers = match channel.connected_peers().await {
        Ok(peers) => peers,
        Err(e) => {
            log::warn!("Could not list peers for {}: {}", item.path, e);
            return report;
        }
    };

    if peers.is_empty() {
        log::debug!("No connected peers, {} not sent", item.path);
        return report;
    }

    for peer in peers {
        match tokio::time::timeout(timeout, channel.put(&peer, item.clone())).await {
            Ok(Ok(())) => {
                report.delivered += 1;
                log::info!("Sent {} to {}", item.path, peer);
            }
            Ok(Err(e)) => {
                report.failed += 1;
                log::warn!("Failed to send {} to {}: {}", item.path, peer, e);
            }
            Err(_) => {
                report.failed += 1;
                log::warn!(
                    "Failed to send {} to {}: {}",
                    item.path,
                    peer,
                    RelayError::SendTimeout(timeout)
                );
            }
        }
    }

    report
}

/// Encode and send an HRV datagram to every connected peer
pub async fn send_hrv<C>(
    channel: &C,
    datagram: &HrvDatagram,
    timeout: Duration,
) -> Result<TransmitReport, RelayError>
where
    C: DataChannel + ?Sized,
{
    let item = DataItem::hrv(datagram)?;
    let report = transmit(channel, item, timeout).await;
    if report.delivered > 0 {
        log::info!(
            "HRV sent to {} peer(s): RMSSD={:.0}ms, HR={} bpm",
            report.delivered,
            datagram.rmssd,
            datagram.avg_heart_rate
        );
    }
    Ok(report)
}

/// Send a connectivity probe to every connected peer
pub async fn ping_peers<C>(channel: &C, timeout: Duration) -> TransmitReport
where
    C: DataChannel + ?Sized,
{
    let item = DataItem {
        path: PING_PATH.to_string(),
        payload: b"Hello Phone (From Watch)".to_vec(),
    };
    transmit(channel, item, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_datagram() -> HrvDatagram {
        HrvDatagram {
            rmssd: 42.0,
            avg_heart_rate: 64,
            timestamp: 1_705_312_800_000,
            formatted_time: "2024-01-15 10:00:00".to_string(),
        }
    }

    #[test]
    fn test_hrv_item_path_and_decode() {
        let item = DataItem::hrv(&sample_datagram()).unwrap();
        assert_eq!(item.path, HRV_DATA_PATH);
        assert_eq!(item.as_hrv(HRV_DATA_PATH).unwrap(), Some(sample_datagram()));
    }

    #[test]
    fn test_other_paths_are_not_hrv() {
        let item = DataItem {
            path: PING_PATH.to_string(),
            payload: b"hello".to_vec(),
        };
        assert_eq!(item.as_hrv(HRV_DATA_PATH).unwrap(), None);
    }

    #[test]
    fn test_configured_path_decodes() {
        let item = DataItem::encode("/custom_hrv", &sample_datagram()).unwrap();
        assert_eq!(item.as_hrv("/custom_hrv").unwrap(), Some(sample_datagram()));
        assert_eq!(item.as_hrv(HRV_DATA_PATH).unwrap(), None);
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let item = DataItem {
            path: HRV_DATA_PATH.to_string(),
            payload: b"{\"rmssd\": 1.0}".to_vec(),
        };
        assert!(matches!(item.as_hrv(HRV_DATA_PATH), Err(RelayError::Codec(_))));
    }

    #[tokio::test]
    async fn test_zero_peers_is_noop() {
        let layer = SimDataLayer::new();
        let watch = layer.create_node();

        let report = send_hrv(&watch, &sample_datagram(), DEFAULT_SEND_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.peers(), 0);
    }

    #[tokio::test]
    async fn test_delivers_to_every_peer() {
        let layer = SimDataLayer::new();
        let watch = layer.create_node();
        let phone = layer.create_node();
        let tablet = layer.create_node();
        let mut phone_inbox = phone.take_inbox().unwrap();
        let mut tablet_inbox = tablet.take_inbox().unwrap();

        let report = send_hrv(&watch, &sample_datagram(), DEFAULT_SEND_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);

        let (from, item) = phone_inbox.recv().await.unwrap();
        assert_eq!(from, watch.id());
        assert_eq!(item.as_hrv(HRV_DATA_PATH).unwrap(), Some(sample_datagram()));
        assert!(tablet_inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_one_failed_peer_does_not_block_others() {
        let layer = SimDataLayer::new();
        let watch = layer.create_node();
        let phone = layer.create_node();
        let broken = layer.create_node();
        broken.set_rejecting(true);
        let mut phone_inbox = phone.take_inbox().unwrap();

        let report = send_hrv(&watch, &sample_datagram(), DEFAULT_SEND_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(phone_inbox.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_peer_times_out() {
        let layer = SimDataLayer::new();
        let watch = layer.create_node();
        let phone = layer.create_node();
        phone.set_stalled(true);

        let before = tokio::time::Instant::now();
        let report = send_hrv(&watch, &sample_datagram(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert!(before.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_ping_counts_peers() {
        let layer = SimDataLayer::new();
        let watch = layer.create_node();
        let phone = layer.create_node();
        let mut inbox = phone.take_inbox().unwrap();

        let report = ping_peers(&watch, DEFAULT_SEND_TIMEOUT).await;
        assert_eq!(report.delivered, 1);
        let (_, item) = inbox.recv().await.unwrap();
        assert_eq!(item.path, PING_PATH);
    }
}
