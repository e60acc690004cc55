//! Fan-out of change events to connected WebSocket sessions.
//!
//! Two broadcast channels: a live channel carrying per-thread
//! `message_change` events, and a fleet channel carrying the global
//! `unread_msgs_update` counter. Both carry pre-serialized JSON so the
//! WebSocket handlers can forward frames without re-encoding.

use tokio::sync::broadcast;
use tracing::debug;
use warelay_core::{ChangeKind, FleetEvent, LiveEvent};

#[derive(Clone)]
pub struct ChangeNotifier {
    live_tx: broadcast::Sender<String>,
    fleet_tx: broadcast::Sender<String>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (live_tx, _) = broadcast::channel(256);
        let (fleet_tx, _) = broadcast::channel(64);
        Self { live_tx, fleet_tx }
    }

    pub fn subscribe_live(&self) -> broadcast::Receiver<String> {
        self.live_tx.subscribe()
    }

    pub fn subscribe_fleet(&self) -> broadcast::Receiver<String> {
        self.fleet_tx.subscribe()
    }

    /// Announce a change to one message. Send errors mean no session is
    /// listening, which is fine.
    pub fn message_change(&self, client_number: &str, change: ChangeKind, msg_db_id: i64) {
        let event = LiveEvent::MessageChange {
            client_number: client_number.to_string(),
            change,
            msg_db_id,
        };
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = self.live_tx.send(json);
        }
        debug!(client_number = %client_number, change = %change.as_str(), "Change event");
    }

    /// Announce the new fleet-wide unread total.
    pub fn unread_update(&self, unread_msgs: i64) {
        let event = FleetEvent::UnreadUpdate { unread_msgs };
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = self.fleet_tx.send(json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_events_reach_subscribers() {
        let notifier = ChangeNotifier::new();
        let mut rx = notifier.subscribe_live();

        notifier.message_change("+15550000001", ChangeKind::MsgReceived, 42);

        let frame = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "message_change");
        assert_eq!(v["msg_db_id"], 42);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let notifier = ChangeNotifier::new();
        notifier.unread_update(3);

        let mut rx = notifier.subscribe_fleet();
        notifier.unread_update(5);
        let frame = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["unread_msgs"], 5);
    }
}
