use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use warelay_core::{Direction, Error, MessageContent, MessageStatus, MessageType, Result};

/// One persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub sid: String,
    pub direction: Direction,
    pub client_number: String,
    /// Names of the agents responsible at send/receive time. A snapshot,
    /// not a live reference.
    pub agents_resp: Vec<String>,
    pub origin_phone_number: Option<String>,
    pub datetime: String,
    pub status: MessageStatus,
    pub content: MessageContent,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub is_redirect: bool,
}

/// Parameters for persisting a message.
pub struct NewMessage {
    pub sid: String,
    pub direction: Direction,
    pub client_number: String,
    pub agents_resp: Vec<String>,
    pub origin_phone_number: Option<String>,
    pub status: MessageStatus,
    pub content: MessageContent,
    pub msg_type: MessageType,
    pub is_redirect: bool,
}

/// Outcome of an idempotent inbound insert.
#[derive(Debug)]
pub enum InboundUpsert {
    Inserted(MessageRecord),
    /// A message with this sid already exists; nothing was written.
    Duplicate,
}

/// One customer conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub number: String,
    pub customer_id: String,
    pub display_name: String,
    pub unread_msgs: i64,
    pub last_msg: String,
}

/// A standing operator-visible announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub id: i64,
    pub message: String,
    pub level: String,
    pub duration: String,
    pub start_time: String,
}

/// SQLite-backed store for messages, customer threads and announcements.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl MessageStore {
    /// Open (or create) the messages database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open messages db: {}", e)))?;

        // WAL for better concurrent read behaviour
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sid TEXT NOT NULL UNIQUE,
                direction INTEGER NOT NULL,
                client_number TEXT NOT NULL,
                agents_resp TEXT NOT NULL DEFAULT '[]',
                origin_phone_number TEXT,
                datetime TEXT NOT NULL,
                status TEXT NOT NULL,
                content TEXT NOT NULL,
                type TEXT NOT NULL,
                is_redirect INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_messages_client ON messages(client_number);
            CREATE INDEX IF NOT EXISTS idx_messages_sid ON messages(sid);

            CREATE TABLE IF NOT EXISTS phone_numbers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                number TEXT NOT NULL UNIQUE,
                customer_id TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL UNIQUE,
                unread_msgs INTEGER NOT NULL DEFAULT 0,
                last_msg TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS announcements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                level TEXT NOT NULL,
                duration TEXT NOT NULL DEFAULT 'inf',
                start_time TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init messages schema: {}", e)))?;

        debug!("Message store schema initialized");
        Ok(())
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
        let direction: i64 = row.get("direction")?;
        let status: String = row.get("status")?;
        let content: String = row.get("content")?;
        let msg_type: String = row.get("type")?;
        let agents_resp: String = row.get("agents_resp")?;

        Ok(MessageRecord {
            id: row.get("id")?,
            sid: row.get("sid")?,
            direction: Direction::from_i64(direction).unwrap_or(Direction::Inbound),
            client_number: row.get("client_number")?,
            agents_resp: serde_json::from_str(&agents_resp).unwrap_or_default(),
            origin_phone_number: row.get("origin_phone_number")?,
            datetime: row.get("datetime")?,
            status: MessageStatus::from_str(&status).unwrap_or(MessageStatus::Pending),
            content: serde_json::from_str(&content)
                .unwrap_or_else(|_| MessageContent::text(content.clone())),
            msg_type: MessageType::from_str(&msg_type).unwrap_or(MessageType::Text),
            is_redirect: row.get::<_, i64>("is_redirect")? != 0,
        })
    }

    fn insert_row(conn: &Connection, new: &NewMessage) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let agents_resp = serde_json::to_string(&new.agents_resp)?;
        let content = serde_json::to_string(&new.content)?;

        conn.execute(
            "INSERT INTO messages
                (sid, direction, client_number, agents_resp, origin_phone_number,
                 datetime, status, content, type, is_redirect)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.sid,
                new.direction.as_i64(),
                new.client_number,
                agents_resp,
                new.origin_phone_number,
                now,
                new.status.as_str(),
                content,
                new.msg_type.as_str(),
                new.is_redirect as i64,
            ],
        )
        .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;

        Ok(conn.last_insert_rowid())
    }

    fn get_by_id_inner(conn: &Connection, id: i64) -> Result<MessageRecord> {
        conn.query_row("SELECT * FROM messages WHERE id = ?1", params![id], |row| {
            Self::row_to_record(row)
        })
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Persist an inbound message exactly once. A duplicate sid is a no-op:
    /// no row is written and the owning thread's unread counter is left
    /// untouched. On insert, the thread's `unread_msgs` is incremented
    /// atomically and `last_msg` updated.
    pub fn upsert_inbound(&self, new: NewMessage, preview: &str) -> Result<InboundUpsert> {
        let conn = self.lock()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM messages WHERE sid = ?1",
                params![new.sid],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        if existing.is_some() {
            debug!(sid = %new.sid, "Inbound message sid already processed, skipping");
            return Ok(InboundUpsert::Duplicate);
        }

        let id = Self::insert_row(&conn, &new)?;

        conn.execute(
            "UPDATE phone_numbers
             SET unread_msgs = unread_msgs + 1, last_msg = ?2
             WHERE number = ?1",
            params![new.client_number, preview],
        )
        .map_err(|e| Error::Storage(format!("Update error: {}", e)))?;

        Ok(InboundUpsert::Inserted(Self::get_by_id_inner(&conn, id)?))
    }

    /// Persist an outbound message. Ids are freshly minted by the provider
    /// gateway, so no dedup is needed.
    pub fn record_outbound(&self, new: NewMessage) -> Result<MessageRecord> {
        let conn = self.lock()?;
        let id = Self::insert_row(&conn, &new)?;
        Self::get_by_id_inner(&conn, id)
    }

    /// Apply a provider status update, last-write-wins. Returns the updated
    /// record, or `None` when no message with this sid was ever persisted
    /// (logged and ignored, non-fatal).
    pub fn apply_status(&self, sid: &str, status: MessageStatus) -> Result<Option<MessageRecord>> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE messages SET status = ?2 WHERE sid = ?1",
                params![sid, status.as_str()],
            )
            .map_err(|e| Error::Storage(format!("Update error: {}", e)))?;

        if changed == 0 {
            warn!(sid = %sid, "Status update for unknown message sid, ignoring");
            return Ok(None);
        }

        conn.query_row(
            "SELECT * FROM messages WHERE sid = ?1",
            params![sid],
            |row| Self::row_to_record(row),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn get_by_sid(&self, sid: &str) -> Result<Option<MessageRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM messages WHERE sid = ?1",
            params![sid],
            |row| Self::row_to_record(row),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<MessageRecord>> {
        let conn = self.lock()?;
        conn.query_row("SELECT * FROM messages WHERE id = ?1", params![id], |row| {
            Self::row_to_record(row)
        })
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Messages of one thread, oldest first.
    pub fn messages_for_number(&self, number: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM messages WHERE client_number = ?1 ORDER BY datetime ASC, id ASC")
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let rows = stmt
            .query_map(params![number], |row| Self::row_to_record(row))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    // ---- Customer threads ----

    fn row_to_customer(row: &Row<'_>) -> rusqlite::Result<Customer> {
        Ok(Customer {
            id: row.get("id")?,
            number: row.get("number")?,
            customer_id: row.get("customer_id")?,
            display_name: row.get("display_name")?,
            unread_msgs: row.get("unread_msgs")?,
            last_msg: row.get("last_msg")?,
        })
    }

    /// Create a customer thread. Display name defaults to the customer id.
    pub fn create_customer(&self, number: &str, customer_id: &str) -> Result<Customer> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO phone_numbers (number, customer_id, display_name) VALUES (?1, ?2, ?2)",
            params![number, customer_id],
        )
        .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;

        conn.query_row(
            "SELECT * FROM phone_numbers WHERE number = ?1",
            params![number],
            |row| Self::row_to_customer(row),
        )
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn customer_by_number(&self, number: &str) -> Result<Option<Customer>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM phone_numbers WHERE number = ?1",
            params![number],
            |row| Self::row_to_customer(row),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn customer_by_cid(&self, customer_id: &str) -> Result<Option<Customer>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM phone_numbers WHERE customer_id = ?1",
            params![customer_id],
            |row| Self::row_to_customer(row),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Display-name lookup, case-insensitive.
    pub fn customer_by_display_name(&self, display_name: &str) -> Result<Option<Customer>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM phone_numbers WHERE LOWER(display_name) = LOWER(?1)",
            params![display_name],
            |row| Self::row_to_customer(row),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// All customer threads, most unread first.
    pub fn list_customers(&self) -> Result<Vec<Customer>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM phone_numbers ORDER BY unread_msgs DESC, id ASC")
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let rows = stmt
            .query_map([], |row| Self::row_to_customer(row))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Customer ids allocated for one `ddmmyyyy` day, used by id generation.
    pub fn customer_ids_for_date(&self, date: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let like = format!("Customer-{}-%", date);
        let mut stmt = conn
            .prepare("SELECT customer_id FROM phone_numbers WHERE customer_id LIKE ?1")
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let rows = stmt
            .query_map(params![like], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Atomic decrement, floored at zero. Used when a message is redirected
    /// away or a thread is viewed.
    pub fn decrement_unread(&self, number: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE phone_numbers
             SET unread_msgs = CASE WHEN unread_msgs > 0 THEN unread_msgs - 1 ELSE 0 END
             WHERE number = ?1",
            params![number],
        )
        .map_err(|e| Error::Storage(format!("Update error: {}", e)))?;
        Ok(())
    }

    /// Mark a whole thread as read.
    pub fn reset_unread(&self, number: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE phone_numbers SET unread_msgs = 0 WHERE number = ?1",
            params![number],
        )
        .map_err(|e| Error::Storage(format!("Update error: {}", e)))?;
        Ok(())
    }

    /// Fleet-wide unread total across all threads.
    pub fn total_unread(&self) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(SUM(unread_msgs), 0) FROM phone_numbers",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn rename_customer(&self, customer_id: &str, display_name: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE phone_numbers SET display_name = ?2 WHERE customer_id = ?1",
                params![customer_id, display_name],
            )
            .map_err(|e| Error::Storage(format!("Update error: {}", e)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("customer {}", customer_id)));
        }
        Ok(())
    }

    /// Administrative removal of a customer thread.
    pub fn remove_customer(&self, number: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM phone_numbers WHERE number = ?1",
                params![number],
            )
            .map_err(|e| Error::Storage(format!("Delete error: {}", e)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("customer {}", number)));
        }
        Ok(())
    }

    // ---- Announcements ----

    /// Raise a standing announcement if one with the same message is not
    /// already active.
    pub fn raise_announcement(&self, message: &str, level: &str) -> Result<()> {
        let conn = self.lock()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM announcements WHERE message = ?1",
                params![message],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        if existing.is_some() {
            return Ok(());
        }

        conn.execute(
            "INSERT INTO announcements (message, level, duration, start_time)
             VALUES (?1, ?2, 'inf', ?3)",
            params![message, level, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;
        Ok(())
    }

    /// Clear a standing announcement by message, if present.
    pub fn clear_announcement(&self, message: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM announcements WHERE message = ?1",
            params![message],
        )
        .map_err(|e| Error::Storage(format!("Delete error: {}", e)))?;
        Ok(())
    }

    pub fn has_announcement(&self, message: &str) -> Result<bool> {
        let conn = self.lock()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM announcements WHERE message = ?1",
                params![message],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        Ok(existing.is_some())
    }

    pub fn active_announcements(&self) -> Result<Vec<Announcement>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM announcements ORDER BY start_time DESC")
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Announcement {
                    id: row.get("id")?,
                    message: row.get("message")?,
                    level: row.get("level")?,
                    duration: row.get("duration")?,
                    start_time: row.get("start_time")?,
                })
            })
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (MessageStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(&dir.path().join("messages.db")).unwrap();
        (store, dir)
    }

    fn inbound(sid: &str, number: &str) -> NewMessage {
        NewMessage {
            sid: sid.to_string(),
            direction: Direction::Inbound,
            client_number: number.to_string(),
            agents_resp: vec![],
            origin_phone_number: None,
            status: MessageStatus::Received,
            content: MessageContent::text("hello"),
            msg_type: MessageType::Text,
            is_redirect: false,
        }
    }

    #[test]
    fn test_inbound_upsert_is_idempotent() {
        let (store, _dir) = test_store();
        store.create_customer("+15550000001", "Customer-01012024-1").unwrap();

        let first = store.upsert_inbound(inbound("sid-1", "+15550000001"), "hello").unwrap();
        assert!(matches!(first, InboundUpsert::Inserted(_)));

        let second = store.upsert_inbound(inbound("sid-1", "+15550000001"), "hello").unwrap();
        assert!(matches!(second, InboundUpsert::Duplicate));

        let customer = store.customer_by_number("+15550000001").unwrap().unwrap();
        assert_eq!(customer.unread_msgs, 1);
        assert_eq!(customer.last_msg, "hello");
    }

    #[test]
    fn test_status_last_write_wins() {
        let (store, _dir) = test_store();
        store.create_customer("+15550000001", "Customer-01012024-1").unwrap();
        store.upsert_inbound(inbound("sid-1", "+15550000001"), "hello").unwrap();

        store.apply_status("sid-1", MessageStatus::Read).unwrap();
        let rec = store.apply_status("sid-1", MessageStatus::Pending).unwrap().unwrap();
        assert_eq!(rec.status, MessageStatus::Pending);
    }

    #[test]
    fn test_status_for_unknown_sid_is_noop() {
        let (store, _dir) = test_store();
        let res = store.apply_status("no-such-sid", MessageStatus::Failed).unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn test_unread_never_negative() {
        let (store, _dir) = test_store();
        store.create_customer("+15550000001", "Customer-01012024-1").unwrap();
        store.decrement_unread("+15550000001").unwrap();
        store.decrement_unread("+15550000001").unwrap();
        let customer = store.customer_by_number("+15550000001").unwrap().unwrap();
        assert_eq!(customer.unread_msgs, 0);
    }

    #[test]
    fn test_display_name_lookup_is_case_insensitive() {
        let (store, _dir) = test_store();
        store.create_customer("+15550000001", "Customer-01012024-1").unwrap();
        store.rename_customer("Customer-01012024-1", "Alice").unwrap();

        let c = store.customer_by_display_name("aLiCe").unwrap().unwrap();
        assert_eq!(c.number, "+15550000001");
    }

    #[test]
    fn test_total_unread_sums_threads() {
        let (store, _dir) = test_store();
        store.create_customer("+15550000001", "Customer-01012024-1").unwrap();
        store.create_customer("+15550000002", "Customer-01012024-2").unwrap();
        store.upsert_inbound(inbound("a", "+15550000001"), "x").unwrap();
        store.upsert_inbound(inbound("b", "+15550000002"), "y").unwrap();
        store.upsert_inbound(inbound("c", "+15550000002"), "z").unwrap();
        assert_eq!(store.total_unread().unwrap(), 3);
    }

    #[test]
    fn test_announcement_raise_and_clear() {
        let (store, _dir) = test_store();
        store.raise_announcement("limit reached", "danger").unwrap();
        store.raise_announcement("limit reached", "danger").unwrap();
        assert_eq!(store.active_announcements().unwrap().len(), 1);
        assert!(store.has_announcement("limit reached").unwrap());

        store.clear_announcement("limit reached").unwrap();
        assert!(!store.has_announcement("limit reached").unwrap());
    }
}
