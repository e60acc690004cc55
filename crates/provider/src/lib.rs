//! WhatsApp provider integration: the HTTP gateway, status normalization
//! and the canned system replies.

pub mod api;
pub mod gateway;
pub mod responses;
pub mod status;

pub use api::{SentMessage, WhatsAppApi};
pub use gateway::InfobipGateway;
