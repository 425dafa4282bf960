use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Conversation rows kept per user; older rows are pruned on every append.
pub const HISTORY_KEPT_ROWS: usize = 20;

#[derive(Debug)]
pub struct BotStore {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    fn from_db(value: &str) -> Self {
        match value {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    NameTaken,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Recorded,
    AlreadyConfirmed,
}

#[derive(Debug, thiserror::Error)]
pub enum BotStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
}

impl BotStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, BotStoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    /// Directory lookup backing the registration state: `Some(name)` means the
    /// sender is registered.
    pub fn find_employee_name(&self, user_id: &str) -> Result<Option<String>, BotStoreError> {
        let conn = self.open()?;
        let name = conn
            .query_row(
                "SELECT employee_name FROM employees WHERE line_user_id = ?1",
                params![user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Insert a directory entry. Uniqueness violations are part of the normal
    /// flow (duplicate name, concurrent double registration) and come back as
    /// outcomes rather than errors.
    pub fn register_employee(
        &self,
        user_id: &str,
        employee_name: &str,
    ) -> Result<RegisterOutcome, BotStoreError> {
        let conn = self.open()?;
        let result = conn.execute(
            "INSERT INTO employees (line_user_id, employee_name, registered_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, employee_name, format_datetime(Utc::now())],
        );
        match result {
            Ok(_) => Ok(RegisterOutcome::Registered),
            Err(err) if is_unique_violation(&err, "employees.employee_name") => {
                Ok(RegisterOutcome::NameTaken)
            }
            Err(err) if is_unique_violation(&err, "employees.line_user_id") => {
                Ok(RegisterOutcome::AlreadyRegistered)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve employee names to LINE user ids in one query. Names without a
    /// directory entry are simply absent from the returned map.
    pub fn lookup_user_ids(
        &self,
        employee_names: &[String],
    ) -> Result<HashMap<String, String>, BotStoreError> {
        if employee_names.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.open()?;
        let placeholders = vec!["?"; employee_names.len()].join(", ");
        let sql = format!(
            "SELECT employee_name, line_user_id FROM employees WHERE employee_name IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(employee_names.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut resolved = HashMap::new();
        for row in rows {
            let (name, user_id) = row?;
            resolved.insert(name, user_id);
        }
        Ok(resolved)
    }

    /// Append one side of an exchange, then prune the user's history down to
    /// the most recent `HISTORY_KEPT_ROWS` rows (by insertion order).
    pub fn append_message(
        &self,
        user_id: &str,
        role: MessageRole,
        text: &str,
    ) -> Result<(), BotStoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO conversation_log (line_user_id, role, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, role.as_str(), text, format_datetime(Utc::now())],
        )?;
        conn.execute(
            "DELETE FROM conversation_log
             WHERE line_user_id = ?1
               AND id NOT IN (
                   SELECT id FROM conversation_log
                   WHERE line_user_id = ?1
                   ORDER BY id DESC
                   LIMIT ?2
               )",
            params![user_id, HISTORY_KEPT_ROWS as i64],
        )?;
        Ok(())
    }

    /// Most recent `limit` rows for a user, oldest first.
    pub fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, BotStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT role, message, created_at FROM conversation_log
             WHERE line_user_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut messages = Vec::new();
        for row in rows {
            let (role, text, created_at) = row?;
            messages.push(ConversationMessage {
                role: MessageRole::from_db(&role),
                text,
                created_at: parse_datetime(&created_at)?,
            });
        }
        messages.reverse();
        Ok(messages)
    }

    /// Record a weekly shift confirmation. The UNIQUE(user, week) constraint
    /// turns a same-week repeat into `AlreadyConfirmed` without a new row.
    pub fn record_confirmation(
        &self,
        user_id: &str,
        employee_name: &str,
        week_start: NaiveDate,
    ) -> Result<ConfirmationOutcome, BotStoreError> {
        let conn = self.open()?;
        let result = conn.execute(
            "INSERT INTO shift_confirmations
                 (line_user_id, employee_name, week_start, status, confirmed_at)
             VALUES (?1, ?2, ?3, 'confirmed', ?4)",
            params![
                user_id,
                employee_name,
                week_start.to_string(),
                format_datetime(Utc::now())
            ],
        );
        match result {
            Ok(_) => Ok(ConfirmationOutcome::Recorded),
            Err(err) if is_unique_violation(&err, "shift_confirmations") => {
                Ok(ConfirmationOutcome::AlreadyConfirmed)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn open(&self) -> Result<Connection, BotStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(BOT_SCHEMA)?;
        Ok(conn)
    }
}

fn is_unique_violation(err: &rusqlite::Error, constraint: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation && message.contains(constraint)
        }
        _ => false,
    }
}

const BOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    line_user_id TEXT PRIMARY KEY,
    employee_name TEXT NOT NULL UNIQUE,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    line_user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_log_user
    ON conversation_log (line_user_id, id);

CREATE TABLE IF NOT EXISTS shift_confirmations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    line_user_id TEXT NOT NULL,
    employee_name TEXT NOT NULL,
    week_start TEXT NOT NULL,
    status TEXT NOT NULL,
    confirmed_at TEXT NOT NULL,
    UNIQUE (line_user_id, week_start)
);
"#;

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests;
