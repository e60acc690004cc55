use async_trait::async_trait;
use warelay_core::{MessageContent, MessageType, Result, StandardMessage};

/// What actually left the gateway after a send.
///
/// The sent type and content can differ from what was asked for: a contact
/// card is substituted with a canned text notice before sending.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Provider-assigned message id, used to correlate status callbacks.
    pub sid: String,
    pub msg_type: MessageType,
    pub content: MessageContent,
    /// When set, status callbacks for this sid are routed to the discard
    /// endpoint and never reach the store.
    pub status_discarded: bool,
}

/// Seam between the routing engine and the concrete WhatsApp provider.
/// Production uses [`crate::InfobipGateway`]; tests substitute a fake.
#[async_trait]
pub trait WhatsAppApi: Send + Sync {
    /// Send one outbound message. `msg.to_number` must be set.
    async fn send_message(&self, msg: &StandardMessage) -> Result<SentMessage>;

    /// Fetch the bytes behind a provider media url. Returns the bytes and
    /// the content subtype (file extension), or `None` when the fetch
    /// failed for any reason; callers downgrade the message to text.
    async fn fetch_inbound_media(&self, media_url: &str) -> Option<(Vec<u8>, String)>;
}
