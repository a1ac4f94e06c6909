//! Transport boundary.
//!
//! The runtime consumes a [`Transport`]: reliable, in-order, per-peer
//! delivery of wire frames. Peer addressing, reconnection, and framing
//! beyond the sbor envelope are the transport's concern.
//!
//! [`ChannelNetwork`] is the in-process implementation used by
//! multi-replica tests: every frame goes through the real codec and lands
//! in the destination replica's inbox channel.

use crate::codec;
use braid_core::OutboundMessage;
use braid_types::ReplicaId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Outbound side of the wire.
pub trait Transport: Send + Sync {
    /// Deliver a frame to every other replica.
    fn broadcast(&self, message: &OutboundMessage);

    /// Deliver a frame to one replica.
    fn send(&self, to: ReplicaId, message: &OutboundMessage);
}

/// An in-process network of replica inboxes.
///
/// Frames are sbor-encoded on send and decoded by the inbound pump, so the
/// full wire path is exercised even in-process.
#[derive(Default)]
pub struct ChannelNetwork {
    inboxes: Mutex<HashMap<ReplicaId, mpsc::UnboundedSender<(ReplicaId, Vec<u8>)>>>,
}

impl ChannelNetwork {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a replica, returning its transport handle and inbox.
    pub fn register(
        self: &Arc<Self>,
        replica: ReplicaId,
    ) -> (
        Arc<dyn Transport>,
        mpsc::UnboundedReceiver<(ReplicaId, Vec<u8>)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inboxes) = self.inboxes.lock() {
            inboxes.insert(replica, tx);
        }
        let transport = ChannelTransport {
            local: replica,
            network: Arc::clone(self),
        };
        (Arc::new(transport), rx)
    }

    fn deliver(&self, from: ReplicaId, to: ReplicaId, frame: Vec<u8>) {
        let Ok(inboxes) = self.inboxes.lock() else {
            return;
        };
        match inboxes.get(&to) {
            Some(tx) => {
                if tx.send((from, frame)).is_err() {
                    trace!(%from, %to, "inbox closed; dropping frame");
                }
            }
            None => warn!(%from, %to, "no such replica registered"),
        }
    }

    fn peers_of(&self, local: ReplicaId) -> Vec<ReplicaId> {
        self.inboxes
            .lock()
            .map(|inboxes| {
                inboxes
                    .keys()
                    .copied()
                    .filter(|replica| *replica != local)
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct ChannelTransport {
    local: ReplicaId,
    network: Arc<ChannelNetwork>,
}

impl Transport for ChannelTransport {
    fn broadcast(&self, message: &OutboundMessage) {
        let frame = codec::encode(message);
        for peer in self.network.peers_of(self.local) {
            self.network.deliver(self.local, peer, frame.clone());
        }
    }

    fn send(&self, to: ReplicaId, message: &OutboundMessage) {
        let frame = codec::encode(message);
        self.network.deliver(self.local, to, frame);
    }
}

/// Pump inbound frames into the event channel, decoding as they arrive.
///
/// Spawned once per replica; runs until the inbox or event channel closes.
pub(crate) fn spawn_inbound_pump(
    mut inbox: mpsc::UnboundedReceiver<(ReplicaId, Vec<u8>)>,
    event_tx: mpsc::Sender<braid_core::Event>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((from, frame)) = inbox.recv().await {
            match codec::decode_event(from, &frame) {
                Ok(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(%from, error = %e, "dropping malformed frame"),
            }
        }
    })
}
