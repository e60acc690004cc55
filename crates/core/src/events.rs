use serde::{Deserialize, Serialize};

/// What changed about a message: the trigger vocabulary shared by the
/// routing engine and the live/fleet channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    MsgReceived,
    MsgSent,
    MsgStatUpdate,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::MsgReceived => "msg_received",
            ChangeKind::MsgSent => "msg_sent",
            ChangeKind::MsgStatUpdate => "msg_stat_update",
        }
    }
}

/// Events broadcast to live WebSocket sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LiveEvent {
    #[serde(rename = "message_change")]
    MessageChange {
        client_number: String,
        change: ChangeKind,
        msg_db_id: i64,
    },
}

/// Events broadcast on the fleet-wide channel (all server instances).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FleetEvent {
    #[serde(rename = "unread_msgs_update")]
    UnreadUpdate { unread_msgs: i64 },
}
