pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod paths;
pub mod phone;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{ChangeKind, FleetEvent, LiveEvent};
pub use message::{Direction, MessageContent, MessageStatus, MessageType, StandardMessage};
pub use paths::Paths;
