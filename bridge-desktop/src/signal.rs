//! Broadcast-backed environment channel

use bridge_traits::signal::{EnvironmentChannel, HostSignal};
use tokio::sync::broadcast;
use tracing::debug;

/// Environment channel backed by a Tokio broadcast channel
///
/// Any number of host observers may call [`subscribe`](Self::subscribe).
/// Dispatching with no subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct BroadcastEnvironmentChannel {
    sender: broadcast::Sender<HostSignal>,
}

impl BroadcastEnvironmentChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostSignal> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEnvironmentChannel {
    fn default() -> Self {
        Self::new(16)
    }
}

impl EnvironmentChannel for BroadcastEnvironmentChannel {
    fn dispatch(&self, signal: HostSignal) {
        let delivered = self.sender.send(signal).unwrap_or(0);
        debug!(signal = signal.name(), delivered, "Dispatched host signal");
    }
}
