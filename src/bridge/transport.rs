//! Host transport seam used by the bridge

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::events::HostEvent;
use crate::BridgeError;

/// Carries bridge calls to the privileged host
///
/// Implementations perform no authorization of their own; the bridge has
/// already checked the channel before any method is called.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Request/response round trip
    async fn invoke(&self, channel: &str, args: Vec<Value>) -> Result<Value, BridgeError>;

    /// Fire-and-forget notification
    fn send(&self, channel: &str, args: Vec<Value>) -> Result<(), BridgeError>;

    /// Stream of host-originated events
    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;
}
