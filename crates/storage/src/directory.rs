use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use warelay_core::{Error, Result};

/// How an agent is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// A WhatsApp number the gateway forwards to.
    Phone,
    /// An operator using the web console; nothing is forwarded out.
    WebUser,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Phone => "phone",
            AgentKind::WebUser => "web_user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "phone" => Some(AgentKind::Phone),
            "web_user" => Some(AgentKind::WebUser),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub kind: AgentKind,
    /// Present for phone agents, absent for web users.
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectRule {
    pub id: i64,
    /// Customer phone number whose inbound traffic this rule covers.
    pub client_number: String,
    pub agent_id: i64,
}

/// SQLite-backed store for agents and redirect rules.
#[derive(Clone)]
pub struct DirectoryStore {
    inner: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl DirectoryStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open directory db: {}", e)))?;
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
            CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                phone_number TEXT UNIQUE
            );

            CREATE TABLE IF NOT EXISTS redirect_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_number TEXT NOT NULL,
                agent_id INTEGER NOT NULL REFERENCES agents(id),
                UNIQUE(client_number, agent_id)
            );

            CREATE INDEX IF NOT EXISTS idx_rules_client ON redirect_rules(client_number);
            CREATE INDEX IF NOT EXISTS idx_rules_agent ON redirect_rules(agent_id);
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init directory schema: {}", e)))?;

        debug!("Directory store schema initialized");
        Ok(())
    }

    fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
        let kind: String = row.get("kind")?;
        Ok(Agent {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: AgentKind::from_str(&kind).unwrap_or(AgentKind::Phone),
            phone_number: row.get("phone_number")?,
        })
    }

    pub fn add_agent(&self, name: &str, kind: AgentKind, phone_number: Option<&str>) -> Result<Agent> {
        if kind == AgentKind::Phone && phone_number.is_none() {
            return Err(Error::Validation("Phone agent requires a phone number".into()));
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agents (name, kind, phone_number) VALUES (?1, ?2, ?3)",
            params![name, kind.as_str(), phone_number],
        )
        .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;

        let id = conn.last_insert_rowid();
        conn.query_row("SELECT * FROM agents WHERE id = ?1", params![id], |row| {
            Self::row_to_agent(row)
        })
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn agent_by_id(&self, id: i64) -> Result<Option<Agent>> {
        let conn = self.lock()?;
        conn.query_row("SELECT * FROM agents WHERE id = ?1", params![id], |row| {
            Self::row_to_agent(row)
        })
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn agent_by_phone(&self, phone_number: &str) -> Result<Option<Agent>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM agents WHERE phone_number = ?1",
            params![phone_number],
            |row| Self::row_to_agent(row),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn agent_by_name(&self, name: &str) -> Result<Option<Agent>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM agents WHERE name = ?1",
            params![name],
            |row| Self::row_to_agent(row),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM agents ORDER BY name ASC")
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map([], |row| Self::row_to_agent(row))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn remove_agent(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM redirect_rules WHERE agent_id = ?1", params![id])
            .map_err(|e| Error::Storage(format!("Delete error: {}", e)))?;
        let changed = conn
            .execute("DELETE FROM agents WHERE id = ?1", params![id])
            .map_err(|e| Error::Storage(format!("Delete error: {}", e)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("agent {}", id)));
        }
        Ok(())
    }

    // ---- Redirect rules ----

    pub fn add_rule(&self, client_number: &str, agent_id: i64) -> Result<RedirectRule> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO redirect_rules (client_number, agent_id) VALUES (?1, ?2)",
            params![client_number, agent_id],
        )
        .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;

        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT * FROM redirect_rules WHERE id = ?1",
            params![id],
            |row| {
                Ok(RedirectRule {
                    id: row.get("id")?,
                    client_number: row.get("client_number")?,
                    agent_id: row.get("agent_id")?,
                })
            },
        )
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn rule_exists(&self, client_number: &str, agent_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM redirect_rules WHERE client_number = ?1 AND agent_id = ?2",
                params![client_number, agent_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        Ok(found.is_some())
    }

    pub fn count_rules_for_number(&self, client_number: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM redirect_rules WHERE client_number = ?1",
            params![client_number],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Agents responsible for one customer number.
    pub fn agents_for_number(&self, client_number: &str) -> Result<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT a.* FROM agents a
                 JOIN redirect_rules r ON r.agent_id = a.id
                 WHERE r.client_number = ?1
                 ORDER BY a.name ASC",
            )
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![client_number], |row| Self::row_to_agent(row))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// Customer numbers one agent is responsible for.
    pub fn numbers_for_agent(&self, agent_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT client_number FROM redirect_rules WHERE agent_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![agent_id], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn list_rules(&self) -> Result<Vec<RedirectRule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM redirect_rules ORDER BY id ASC")
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RedirectRule {
                    id: row.get("id")?,
                    client_number: row.get("client_number")?,
                    agent_id: row.get("agent_id")?,
                })
            })
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    pub fn delete_rule(&self, client_number: &str, agent_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM redirect_rules WHERE client_number = ?1 AND agent_id = ?2",
                params![client_number, agent_id],
            )
            .map_err(|e| Error::Storage(format!("Delete error: {}", e)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "rule {} -> agent {}",
                client_number, agent_id
            )));
        }
        Ok(())
    }
}
