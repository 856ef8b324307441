//! SQLite-based task store.
//!
//! Provides durable task records so a restarted scheduler can reconcile
//! against the tasks it launched before.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use ksched_id::FrameworkId;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{status_task_name, StoreError, StoreResult, TaskStore};
use crate::model::{TaskInfo, TaskStatus};

const FRAMEWORK_ID_KEY: &str = "framework_id";
const SUPPRESSED_KEY: &str = "suppressed";

/// SQLite task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Open or create a task store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn get_property(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT value FROM properties WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn set_property(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO properties (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            name TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            info_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS statuses (
            name TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            status_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS properties (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    debug!("Task store schema initialized");
    Ok(())
}

impl TaskStore for SqliteTaskStore {
    fn store_tasks(&self, tasks: &[TaskInfo]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for task in tasks {
            let json = serde_json::to_string(task)?;
            tx.execute(
                "INSERT INTO tasks (name, task_id, info_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    task_id = excluded.task_id,
                    info_json = excluded.info_json",
                params![task.name, task.task_id.as_str(), json],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn store_status(&self, status: &TaskStatus) -> StoreResult<()> {
        let name = status_task_name(status)?;
        let json = serde_json::to_string(status)?;
        let conn = self.conn()?;

        let current: Option<String> = conn
            .query_row(
                "SELECT task_id FROM tasks WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            None => return Err(StoreError::NotFound(name.to_string())),
            Some(task_id) if task_id != status.task_id.as_str() => {
                return Err(StoreError::StaleStatus {
                    name: name.to_string(),
                    task_id: status.task_id.to_string(),
                });
            }
            Some(_) => {}
        }

        conn.execute(
            "INSERT INTO statuses (name, task_id, status_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                task_id = excluded.task_id,
                status_json = excluded.status_json",
            params![name, status.task_id.as_str(), json],
        )?;
        Ok(())
    }

    fn fetch_task(&self, name: &str) -> StoreResult<Option<TaskInfo>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT info_json FROM tasks WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(Into::into)
    }

    fn fetch_status(&self, name: &str) -> StoreResult<Option<TaskStatus>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT status_json FROM statuses WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(Into::into)
    }

    fn fetch_tasks(&self) -> StoreResult<Vec<TaskInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT info_json FROM tasks ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(StoreError::from))
            .collect()
    }

    fn fetch_statuses(&self) -> StoreResult<Vec<TaskStatus>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status_json FROM statuses ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(StoreError::from))
            .collect()
    }

    fn task_names(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM tasks ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn framework_id(&self) -> StoreResult<Option<FrameworkId>> {
        Ok(self.get_property(FRAMEWORK_ID_KEY)?.map(FrameworkId::new))
    }

    fn set_framework_id(&self, id: &FrameworkId) -> StoreResult<()> {
        self.set_property(FRAMEWORK_ID_KEY, id.as_str())
    }

    fn set_suppressed(&self, suppressed: bool) -> StoreResult<()> {
        self.set_property(SUPPRESSED_KEY, if suppressed { "true" } else { "false" })
    }

    fn is_suppressed(&self) -> StoreResult<bool> {
        Ok(self.get_property(SUPPRESSED_KEY)?.as_deref() == Some("true"))
    }
}
