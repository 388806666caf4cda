//! In-process data layer
//!
//! Lets a simulated watch and phone exchange data items inside one process.
//! Used by tests and by the `simulate` CLI command.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{DataChannel, DataItem, Inbound, PeerId};
use crate::error::RelayError;

struct NodeState {
    inbox: mpsc::Sender<Inbound>,
    connected: bool,
    rejecting: bool,
    stalled: bool,
}

/// Shared medium all simulated nodes are attached to
pub struct SimDataLayer {
    nodes: Mutex<HashMap<PeerId, NodeState>>,
}

impl SimDataLayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a new connected node to the layer
    pub fn create_node(self: &Arc<Self>) -> SimNode {
        let (tx, rx) = mpsc::channel(64);
        let id = Uuid::new_v4();
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.insert(
                id,
                NodeState {
                    inbox: tx,
                    connected: true,
                    rejecting: false,
                    stalled: false,
                },
            );
        }
        SimNode {
            id,
            layer: Arc::clone(self),
            inbox: Mutex::new(Some(rx)),
        }
    }

    fn update(&self, id: &PeerId, f: impl FnOnce(&mut NodeState)) {
        if let Ok(mut nodes) = self.nodes.lock() {
            if let Some(state) = nodes.get_mut(id) {
                f(state);
            }
        }
    }
}

/// A device attached to the simulated data layer
pub struct SimNode {
    id: PeerId,
    layer: Arc<SimDataLayer>,
    inbox: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

impl SimNode {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Take the receiving end of this node's inbox; only the first call succeeds
    pub fn take_inbox(&self) -> Option<mpsc::Receiver<Inbound>> {
        self.inbox.lock().ok().and_then(|mut inbox| inbox.take())
    }

    pub fn set_connected(&self, connected: bool) {
        self.layer.update(&self.id, |s| s.connected = connected);
    }

    /// Refuse every item sent to this node
    pub fn set_rejecting(&self, rejecting: bool) {
        self.layer.update(&self.id, |s| s.rejecting = rejecting);
    }

    /// Never complete enqueue for items sent to this node
    pub fn set_stalled(&self, stalled: bool) {
        self.layer.update(&self.id, |s| s.stalled = stalled);
    }
}

#[async_trait]
impl DataChannel for SimNode {
    async fn connected_peers(&self) -> Result<Vec<PeerId>, RelayError> {
        let nodes = self
            .layer
            .nodes
            .lock()
            .map_err(|_| RelayError::Transport("data layer poisoned".to_string()))?;

        let self_connected = nodes.get(&self.id).is_some_and(|s| s.connected);
        if !self_connected {
            return Ok(Vec::new());
        }

        Ok(nodes
            .iter()
            .filter(|(id, state)| **id != self.id && state.connected)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn put(&self, peer: &PeerId, item: DataItem) -> Result<(), RelayError> {
        let (inbox, stalled) = {
            let nodes = self
                .layer
                .nodes
                .lock()
                .map_err(|_| RelayError::Transport("data layer poisoned".to_string()))?;
            let state = nodes
                .get(peer)
                .ok_or_else(|| RelayError::Transport(format!("unknown peer {peer}")))?;
            if !state.connected {
                return Err(RelayError::Transport(format!("peer {peer} not connected")));
            }
            if state.rejecting {
                return Err(RelayError::Transport(format!("peer {peer} rejected item")));
            }
            (state.inbox.clone(), state.stalled)
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        inbox
            .send((self.id, item))
            .await
            .map_err(|_| RelayError::Transport(format!("peer {peer} inbox closed")))
    }
}
