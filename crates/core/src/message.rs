use serde::{Deserialize, Serialize};

/// Kind of a WhatsApp message, as exchanged with the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Document,
    Image,
    Audio,
    Voice,
    Video,
    Sticker,
    Location,
    Contact,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Document => "document",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Voice => "voice",
            MessageType::Video => "video",
            MessageType::Sticker => "sticker",
            MessageType::Location => "location",
            MessageType::Contact => "contact",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(MessageType::Text),
            "document" => Some(MessageType::Document),
            "image" => Some(MessageType::Image),
            "audio" => Some(MessageType::Audio),
            "voice" => Some(MessageType::Voice),
            "video" => Some(MessageType::Video),
            "sticker" => Some(MessageType::Sticker),
            "location" => Some(MessageType::Location),
            "contact" => Some(MessageType::Contact),
            _ => None,
        }
    }

    /// Types whose payload is a media URL that has to be fetched on receipt.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MessageType::Document
                | MessageType::Image
                | MessageType::Audio
                | MessageType::Voice
                | MessageType::Video
                | MessageType::Sticker
        )
    }

    /// Types that carry an optional caption next to the media URL.
    pub fn supports_caption(&self) -> bool {
        matches!(
            self,
            MessageType::Document | MessageType::Image | MessageType::Video
        )
    }

    /// Map an uploaded file extension to the outbound message type.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" => MessageType::Image,
            "aac" | "amr" | "mp3" | "opus" => MessageType::Audio,
            "mp4" | "3gpp" => MessageType::Video,
            "webp" => MessageType::Sticker,
            _ => MessageType::Document,
        }
    }
}

/// Delivery status of a message.
///
/// `Received` marks inbound messages; the rest follow the provider's
/// outbound lifecycle. Transitions are last-write-wins: the provider may
/// skip or reorder intermediate states, so no ordering is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Failed,
    Sent,
    Delivered,
    Read,
    Received,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Failed => "failed",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Received => "received",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(MessageStatus::Pending),
            "failed" => Some(MessageStatus::Failed),
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            "received" => Some(MessageStatus::Received),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_i64(&self) -> i64 {
        match self {
            Direction::Inbound => 0,
            Direction::Outbound => 1,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Direction::Inbound),
            1 => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// Type-tagged message payload. Serializes to the provider's content
/// object shape: `{"text": ...}`, `{"mediaUrl": ..., "caption": ...}` or
/// the location fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text {
        text: String,
    },
    Media {
        #[serde(rename = "mediaUrl")]
        media_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Location {
        longitude: f64,
        latitude: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    pub fn media(media_url: impl Into<String>, caption: Option<String>) -> Self {
        MessageContent::Media {
            media_url: media_url.into(),
            caption,
        }
    }

    /// Text body or media caption, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text.as_str()),
            MessageContent::Media { caption, .. } => caption.as_deref(),
            MessageContent::Location { .. } => None,
        }
    }

    /// Replace the text body or media caption. No-op for locations.
    pub fn set_body(&mut self, body: String) {
        match self {
            MessageContent::Text { text } => *text = body,
            MessageContent::Media { caption, .. } => *caption = Some(body),
            MessageContent::Location { .. } => {}
        }
    }

    /// Short preview string stored on the customer thread (`last_msg`).
    pub fn preview(&self) -> String {
        match self {
            MessageContent::Text { text } => text.clone(),
            MessageContent::Media { .. } => "Media File(s)".to_string(),
            MessageContent::Location { .. } => "Location".to_string(),
        }
    }
}

/// Provider-independent message envelope passed between the webhook
/// handlers, the routing engine and the provider gateway.
#[derive(Debug, Clone)]
pub struct StandardMessage {
    pub message_id: Option<String>,
    pub msg_type: MessageType,
    pub content: MessageContent,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub status: Option<MessageStatus>,
}

impl StandardMessage {
    pub fn outbound(msg_type: MessageType, content: MessageContent, to_number: &str) -> Self {
        Self {
            message_id: None,
            msg_type,
            content,
            from_number: None,
            to_number: Some(to_number.to_string()),
            status: None,
        }
    }
}
