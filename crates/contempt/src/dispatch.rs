//! Ordered application of gateway packets to the cache.

use std::sync::Arc;

use contempt_proto::{DispatchEvent, GatewayPacket, OpCode};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::EntityCache;

const OBSERVER_CAPACITY: usize = 1024;

/// Decodes packets, applies dispatch events to the [`EntityCache`] and
/// republishes every packet to observers.
///
/// Packets are handled one at a time, in arrival order, by a single consumer.
pub struct PacketDispatcher {
    cache: Arc<EntityCache>,
    observers: broadcast::Sender<GatewayPacket>,
}

impl PacketDispatcher {
    /// Dispatcher writing into `cache`.
    #[must_use]
    pub fn new(cache: Arc<EntityCache>) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self { cache, observers }
    }

    /// The cache this dispatcher writes.
    #[must_use]
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Every packet handled from now on, after its cache update.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayPacket> {
        self.observers.subscribe()
    }

    /// Handle one packet.
    ///
    /// A malformed payload for a recognised event is logged and not applied;
    /// the packet is still forwarded.
    pub async fn handle(&self, packet: GatewayPacket) {
        if packet.op == OpCode::Dispatch {
            if let Some(name) = packet.event_name() {
                self.apply(name, &packet).await;
            }
        }
        // Slow observers lag; they never hold up the cache.
        let _ = self.observers.send(packet);
    }

    async fn apply(&self, name: &str, packet: &GatewayPacket) {
        let event = match DispatchEvent::decode(name, packet.d.clone()) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!(event = name, "dispatch not interpreted");
                return;
            }
            Err(e) => {
                warn!(event = name, seq = ?packet.s, error = %e, "dropping malformed dispatch");
                return;
            }
        };

        match self.cache.apply(event).await {
            Ok(changes) => debug!(
                event = name,
                seq = ?packet.s,
                guilds_changed = changes.guilds,
                private_channels_changed = changes.private_channels,
                "applied dispatch"
            ),
            Err(e) => warn!(event = name, seq = ?packet.s, error = %e, "failed to apply dispatch"),
        }
    }

    /// Consume `packets` until the stream ends.
    pub async fn run(&self, mut packets: mpsc::UnboundedReceiver<GatewayPacket>) {
        while let Some(packet) = packets.recv().await {
            self.handle(packet).await;
        }
        debug!("packet stream ended");
    }

    /// Run the consumer on its own task.
    pub fn spawn(self: Arc<Self>, packets: mpsc::UnboundedReceiver<GatewayPacket>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(packets).await })
    }
}

impl std::fmt::Debug for PacketDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketDispatcher")
            .field("observers", &self.observers.receiver_count())
            .finish_non_exhaustive()
    }
}
