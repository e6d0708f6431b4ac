//! SQLite-backed message store

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::{DuplicateKeyError, MailStore, SizeAggregate};
use crate::models::{Label, LabelId, MessageId, MessageMetadata, MessageRecord};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            processed INTEGER NOT NULL DEFAULT 0,
            size_estimate INTEGER NOT NULL DEFAULT 0,
            internal_date INTEGER NOT NULL DEFAULT 0  -- millis since epoch
        );

        CREATE INDEX idx_messages_processed ON messages(processed);
        CREATE INDEX idx_messages_internal_date ON messages(internal_date DESC);

        -- Label ids per message, in the order the source lists them
        CREATE TABLE message_labels (
            message_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            label_id TEXT NOT NULL,
            PRIMARY KEY (message_id, position),
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_message_labels_label ON message_labels(label_id, message_id);

        CREATE TABLE labels (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        );
        "#,
    )])
}

/// Schema of the labels table, recreated on every label refresh
const LABELS_TABLE: &str = "
    DROP TABLE IF EXISTS labels;
    CREATE TABLE labels (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );
";

/// SQLite-based message store
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and bring its schema up to date
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // foreign_keys is required for ON DELETE CASCADE on message_labels
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn load_labels(conn: &Connection, message_id: &str) -> Result<Vec<LabelId>> {
        let mut stmt = conn.prepare(
            "SELECT label_id FROM message_labels WHERE message_id = ? ORDER BY position",
        )?;
        let labels = stmt
            .query_map([message_id], |row| row.get::<_, String>(0))?
            .map(|id| id.map(LabelId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    /// Load one record by a query selecting (id, processed, size_estimate, internal_date)
    fn load_record(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<MessageRecord>> {
        let row: Option<(String, bool, i64, i64)> = conn
            .query_row(sql, params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .optional()?;

        let Some((id, processed, size_estimate, millis)) = row else {
            return Ok(None);
        };

        let label_ids = Self::load_labels(conn, &id)?;
        Ok(Some(MessageRecord {
            id: MessageId::new(id),
            label_ids,
            processed,
            size_estimate,
            internal_date: from_millis(millis)?,
        }))
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .with_context(|| format!("Stored internal_date out of range: {}", millis))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                )
    )
}

impl MailStore for SqliteMailStore {
    fn insert_message(&self, record: MessageRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO messages (id, processed, size_estimate, internal_date)
             VALUES (?, ?, ?, ?)",
            params![
                record.id.as_str(),
                record.processed,
                record.size_estimate,
                record.internal_date.timestamp_millis(),
            ],
        );
        match inserted {
            Err(e) if is_unique_violation(&e) => return Err(DuplicateKeyError(record.id).into()),
            other => {
                other.with_context(|| format!("Can't insert message {}", record.id))?;
            }
        }

        let mut stmt = tx.prepare(
            "INSERT INTO message_labels (message_id, label_id, position) VALUES (?, ?, ?)",
        )?;
        for (position, label) in record.label_ids.iter().enumerate() {
            stmt.execute(params![record.id.as_str(), label.as_str(), position as i64])?;
        }
        drop(stmt);

        tx.commit()?;
        Ok(())
    }

    fn update_message(&self, id: &MessageId, metadata: &MessageMetadata) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE messages SET processed = 1, size_estimate = ?, internal_date = ? WHERE id = ?",
            params![
                metadata.size_estimate,
                metadata.internal_date.timestamp_millis(),
                id.as_str(),
            ],
        )?;
        if updated == 0 {
            return Ok(());
        }

        tx.execute("DELETE FROM message_labels WHERE message_id = ?", [id.as_str()])?;
        let mut stmt = tx.prepare(
            "INSERT INTO message_labels (message_id, label_id, position) VALUES (?, ?, ?)",
        )?;
        for (position, label) in metadata.label_ids.iter().enumerate() {
            stmt.execute(params![id.as_str(), label.as_str(), position as i64])?;
        }
        drop(stmt);

        tx.commit()?;
        Ok(())
    }

    fn remove_message(&self, id: &MessageId) -> Result<()> {
        // message_labels rows go with it via CASCADE
        self.conn()?
            .execute("DELETE FROM messages WHERE id = ?", [id.as_str()])?;
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<MessageRecord>> {
        let conn = self.conn()?;
        Self::load_record(
            &conn,
            "SELECT id, processed, size_estimate, internal_date FROM messages WHERE id = ?",
            [id.as_str()],
        )
    }

    fn latest_message(&self) -> Result<Option<MessageRecord>> {
        let conn = self.conn()?;
        Self::load_record(
            &conn,
            "SELECT id, processed, size_estimate, internal_date FROM messages
             ORDER BY internal_date DESC, id ASC LIMIT 1",
            [],
        )
    }

    fn find_unprocessed(&self, limit: usize) -> Result<Vec<MessageId>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM messages WHERE processed = 0 ORDER BY id LIMIT ?")?;
        let ids = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))?
            .map(|id| id.map(MessageId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn count_messages(&self) -> Result<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_unprocessed(&self) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE processed = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn replace_labels(&self, labels: &[Label]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute_batch(LABELS_TABLE)
            .context("Can't recreate labels table")?;

        let mut stmt = tx.prepare("INSERT INTO labels (id, name) VALUES (?, ?)")?;
        for label in labels {
            stmt.execute(params![label.id.as_str(), label.name])
                .with_context(|| format!("Can't insert label {}", label.id.as_str()))?;
        }
        drop(stmt);

        tx.commit()?;
        Ok(())
    }

    fn list_labels(&self) -> Result<Vec<Label>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM labels ORDER BY name ASC, id ASC")?;
        let labels = stmt
            .query_map([], |row| {
                Ok(Label::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    fn aggregate_sizes(&self, labels: &[LabelId]) -> Result<SizeAggregate> {
        let mut wanted: Vec<&str> = labels.iter().map(|l| l.as_str()).collect();
        wanted.sort_unstable();
        wanted.dedup();

        let conn = self.conn()?;
        let (size, count): (i64, i64) = if wanted.is_empty() {
            conn.query_row(
                "SELECT COALESCE(SUM(size_estimate), 0), COUNT(*) FROM messages WHERE processed = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
        } else {
            // A message matches when it carries as many distinct wanted
            // labels as there are wanted labels
            let placeholders = vec!["?"; wanted.len()].join(", ");
            let sql = format!(
                "SELECT COALESCE(SUM(m.size_estimate), 0), COUNT(*) FROM messages m
                 WHERE m.processed = 1 AND (
                     SELECT COUNT(DISTINCT ml.label_id) FROM message_labels ml
                     WHERE ml.message_id = m.id AND ml.label_id IN ({})
                 ) = {}",
                placeholders,
                wanted.len()
            );
            conn.query_row(&sql, params_from_iter(wanted.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
        };

        Ok(SizeAggregate {
            size,
            count: count as u64,
        })
    }
}
