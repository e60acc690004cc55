//! Persistence for the relay: message history, customer threads, agents,
//! redirect rules and fetched media.

pub mod directory;
pub mod media;
pub mod messages;

pub use directory::{Agent, AgentKind, DirectoryStore, RedirectRule};
pub use media::MediaStore;
pub use messages::{
    Announcement, Customer, InboundUpsert, MessageRecord, MessageStore, NewMessage,
};
