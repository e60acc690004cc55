//! Pure message-shaping rules for both relay directions.

use warelay_core::{MessageContent, MessageType};

/// Shape a customer message for delivery to an agent. The customer's
/// display name is prepended in bold so the agent can tell threads apart.
///
/// Text and captionable media carry the name inline; everything else is
/// preceded by a separate one-line text header.
pub fn to_agent(
    display_name: &str,
    msg_type: MessageType,
    content: &MessageContent,
) -> Vec<(MessageType, MessageContent)> {
    let header = format!("*{}*:", display_name);

    match (msg_type, content) {
        (MessageType::Text, MessageContent::Text { text }) => {
            vec![(
                MessageType::Text,
                MessageContent::text(format!("{}\n{}", header, text)),
            )]
        }
        (MessageType::Image | MessageType::Video, MessageContent::Media { media_url, caption }) => {
            let caption = match caption {
                Some(c) => format!("{}\n{}", header, c),
                None => header,
            };
            vec![(
                msg_type,
                MessageContent::media(media_url.clone(), Some(caption)),
            )]
        }
        _ => vec![
            (MessageType::Text, MessageContent::text(header)),
            (msg_type, content.clone()),
        ],
    }
}

/// Whether an agent message can carry an address line when the agent has
/// more than one customer: any text (the first line names the customer),
/// or captioned media of a type that supports captions. Media without a
/// caption slot has nowhere to put the name.
pub fn can_address(msg_type: MessageType, content: &MessageContent) -> bool {
    match (msg_type, content) {
        (MessageType::Text, MessageContent::Text { .. }) => true,
        (_, MessageContent::Media { caption, .. }) => {
            msg_type.supports_caption() && caption.is_some()
        }
        _ => false,
    }
}

/// The address line of an agent message: first body line, trimmed.
pub fn address_line(content: &MessageContent) -> Option<String> {
    content
        .body()
        .map(|b| b.lines().next().unwrap_or(b).trim().to_string())
        .filter(|l| !l.is_empty())
}

/// Remove the address line before forwarding to the customer. A caption
/// that was only the address line is dropped entirely.
pub fn strip_address_line(msg_type: MessageType, content: &MessageContent) -> MessageContent {
    let rest = content
        .body()
        .and_then(|b| b.split_once('\n'))
        .map(|(_, rest)| rest.to_string());

    match (msg_type, content) {
        (MessageType::Text, MessageContent::Text { .. }) => {
            MessageContent::text(rest.unwrap_or_default())
        }
        (_, MessageContent::Media { media_url, .. }) => {
            MessageContent::media(media_url.clone(), rest.filter(|r| !r.trim().is_empty()))
        }
        _ => content.clone(),
    }
}
