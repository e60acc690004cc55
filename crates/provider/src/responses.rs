//! Canned system replies sent back over WhatsApp. WhatsApp markdown:
//! `_.._` is italic, `*..*` is bold.

/// Agent reply's first line matched no customer display name.
pub const INVALID_CUSTOMER_ID: &str =
    "_*System:* The first line of your message did not match any of your customers. \
Start your reply with the customer's name on its own line and resend._";

/// Agent named a customer that exists but is not assigned to them.
pub const CUSTOMER_NOT_ASSIGNED: &str =
    "_*System:* That customer is not assigned to you._";

/// Agent replied with a message type that cannot carry an address line.
pub const MEDIA_UNSUPPORTED: &str =
    "_*System:* This message type cannot be forwarded. Send text, or a \
document, image or video with a caption._";

/// Agent with no customers sent the gateway a message.
pub const AGENT_NO_CUSTOMERS: &str =
    "_*System:* You have no customers assigned yet, so there is no one to \
forward your message to._";

/// Contact cards cannot be relayed.
pub const CONTACT_UNSUPPORTED: &str =
    "_*System:* Contact cards are not supported. Please type the details \
instead._";

/// Stored in place of media that could not be fetched from the provider.
pub const MEDIA_DOWNLOAD_FAILURE: &str = "System Error: Media Download Failure";

/// Standing announcement raised when the daily customer id budget is spent.
pub const DAILY_LIMIT_ANNOUNCEMENT: &str =
    "Daily new-customer limit reached. Messages from unknown numbers are \
being dropped until tomorrow.";

/// Notice to the origin agent when their forwarded message failed and the
/// automatic resend failed too.
pub fn resend_failed(body: &str) -> String {
    format!(
        "_*System:* Your message could not be delivered and the retry failed:_\n{}",
        body
    )
}
