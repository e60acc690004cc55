use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use warelay_core::{phone, Config, Error, MessageContent, MessageType, Result, StandardMessage};

use crate::api::{SentMessage, WhatsAppApi};
use crate::responses;

const STATUS_CALLBACK_PATH: &str = "/api/waapi/callbacks/message_status_update";
const DISCARD_CALLBACK_PATH: &str = "/api/waapi/callbacks/fake_200_callback";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    message_id: &'a str,
    content: &'a MessageContent,
    callback_data: &'a str,
    notify_url: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    message_id: Option<String>,
}

/// WhatsApp provider gateway over the Infobip HTTP API.
pub struct InfobipGateway {
    client: Client,
    config: Config,
}

impl InfobipGateway {
    pub fn new(config: Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Provider endpoint path for one message type. Voice notes share the
    /// audio endpoint. Contact cards have no endpoint and are substituted
    /// before this is consulted.
    fn endpoint_for(msg_type: MessageType) -> Option<&'static str> {
        match msg_type {
            MessageType::Text => Some("text"),
            MessageType::Document => Some("document"),
            MessageType::Image => Some("image"),
            MessageType::Audio | MessageType::Voice => Some("audio"),
            MessageType::Video => Some("video"),
            MessageType::Sticker => Some("sticker"),
            MessageType::Location => Some("location"),
            MessageType::Contact => None,
        }
    }

    /// Callback url handed to the provider, carrying basic-auth credentials
    /// as query parameters.
    fn notify_url(&self, path: &str) -> String {
        format!(
            "{}{}?user={}&pass={}",
            self.config.public_url(),
            path,
            urlencoding::encode(&self.config.provider.callback_user),
            urlencoding::encode(&self.config.provider.callback_pass),
        )
    }

    /// Resolve what is actually sent. Contact cards are replaced with a
    /// canned text notice whose status callbacks go to the discard endpoint.
    fn prepare(msg: &StandardMessage) -> (MessageType, MessageContent, bool) {
        if msg.msg_type == MessageType::Contact {
            (
                MessageType::Text,
                MessageContent::text(responses::CONTACT_UNSUPPORTED),
                true,
            )
        } else {
            (msg.msg_type, msg.content.clone(), false)
        }
    }
}

#[async_trait]
impl WhatsAppApi for InfobipGateway {
    async fn send_message(&self, msg: &StandardMessage) -> Result<SentMessage> {
        let to = msg
            .to_number
            .as_deref()
            .ok_or_else(|| Error::Validation("Outbound message missing to_number".into()))?;

        let (msg_type, content, discarded) = Self::prepare(msg);
        let endpoint = Self::endpoint_for(msg_type)
            .ok_or_else(|| Error::Provider(format!("No endpoint for {} message", msg_type.as_str())))?;

        let notify_path = if discarded {
            DISCARD_CALLBACK_PATH
        } else {
            STATUS_CALLBACK_PATH
        };

        // The provider wants bare digits and a caller-minted message id.
        let from = phone::digits_only(&self.config.provider.from_number);
        let to_digits = phone::digits_only(to);
        let sid = Uuid::new_v4().to_string();

        let url = format!(
            "{}/whatsapp/1/message/{}",
            self.config.provider.base_url.trim_end_matches('/'),
            endpoint
        );
        let notify_url = self.notify_url(notify_path);
        let request = SendRequest {
            from: &from,
            to: &to_digits,
            message_id: &sid,
            content: &content,
            callback_data: if discarded { "discard" } else { "" },
            notify_url: &notify_url,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("App {}", self.config.provider.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Send request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Send rejected with {}: {}",
                status, body
            )));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse send response: {}", e)))?;
        let sid = parsed.message_id.unwrap_or(sid);

        debug!(sid = %sid, to = %to_digits, msg_type = %msg_type.as_str(), "Message handed to provider");

        Ok(SentMessage {
            sid,
            msg_type,
            content,
            status_discarded: discarded,
        })
    }

    async fn fetch_inbound_media(&self, media_url: &str) -> Option<(Vec<u8>, String)> {
        let response = match self
            .client
            .get(media_url)
            .header("Authorization", format!("App {}", self.config.provider.api_key))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, url = %media_url, "Media fetch failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %media_url, "Media fetch returned non-success");
            return None;
        }

        let subtype = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(content_subtype)
            .unwrap_or_else(|| "bin".to_string());

        match response.bytes().await {
            Ok(bytes) => Some((bytes.to_vec(), subtype)),
            Err(e) => {
                warn!(error = %e, url = %media_url, "Media body read failed");
                None
            }
        }
    }
}

/// `image/jpeg` -> `jpeg`, `audio/ogg; codecs=opus` -> `ogg`.
fn content_subtype(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .rsplit('/')
        .next()
        .unwrap_or("bin")
        .trim()
        .to_string()
}
