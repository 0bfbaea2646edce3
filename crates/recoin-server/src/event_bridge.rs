use std::sync::Arc;

use tokio::sync::broadcast;

use recoin_core::events::ChatEvent;

use crate::client::ClientRegistry;
use crate::wire;

/// Subscribes to the engine's ChatEvent broadcast and forwards events
/// to connected WebSocket clients.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Start the bridge. Spawns a task that reads from the broadcast
    /// channel and pushes serialized events to every connected client.
    pub fn start(&self, mut rx: broadcast::Receiver<ChatEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let wire_event = wire::chat_event_to_wire(&event);
                        if let Ok(json) = serde_json::to_string(&wire_event) {
                            registry.broadcast_all(&json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<ChatEvent>,
) -> tokio::task::JoinHandle<()> {
    let bridge = EventBridge::new(registry);
    bridge.start(rx)
}

/// Serialize a chat event to its wire string.
pub fn serialize_event(event: &ChatEvent) -> Option<String> {
    let wire = wire::chat_event_to_wire(event);
    serde_json::to_string(&wire).ok()
}
