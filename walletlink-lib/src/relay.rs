use crate::{Result, Topic};

/// Inbound notifications from a relay connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// A message arrived on a subscribed topic.
    Message { topic: Topic, message: String },
    /// The connection was re-established and server-side subscriptions are gone.
    Reconnected,
}

/// Publish/subscribe transport carrying opaque messages per topic.
///
/// Implementations deliver inbound traffic as [`RelayEvent`]s through a
/// channel handed to the client at start-up, so a single consumer sees
/// messages in arrival order.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait RelayTransport: Send + Sync {
    async fn publish(&self, topic: &Topic, message: &str) -> Result<()>;

    async fn subscribe(&self, topic: &Topic) -> Result<()>;

    async fn unsubscribe(&self, topic: &Topic) -> Result<()>;
}
