use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, sqlite::SqliteRow, Row, SqlitePool};
use thiserror::Error;
use ulid::Ulid;
use uuid::Uuid;

use volja_core::workflow::{ExecutionStatus, StepRecord, StepStatus};

const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for custom records.
    pub fn customs(&self) -> CustomRepository {
        CustomRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for product to custom record links.
    pub fn product_links(&self) -> ProductLinkRepository {
        ProductLinkRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for workflow executions and their steps.
    pub fn workflows(&self) -> WorkflowRepository {
        WorkflowRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the inbound event inbox.
    pub fn event_inbox(&self) -> EventInboxRepository {
        EventInboxRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the notification dispatch log.
    pub fn notifications(&self) -> NotificationLogRepository {
        NotificationLogRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Custom record attached to a product when it is created as "coming soon".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomRecord {
    pub id: String,
    pub coming_soon: bool,
    pub product_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CustomRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let coming_soon: i64 = row.try_get("coming_soon")?;
        Ok(Self {
            id: row.try_get("id")?,
            coming_soon: coming_soon != 0,
            product_id: row.try_get("product_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Payload required to create a custom record.
pub struct NewCustom<'a> {
    pub coming_soon: bool,
    pub product_id: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

/// Repository for the `customs` table.
#[derive(Clone)]
pub struct CustomRepository {
    pool: SqlitePool,
}

impl CustomRepository {
    /// Inserts a new record with a generated `custom_` id.
    pub async fn create(&self, record: NewCustom<'_>) -> Result<CustomRecord, CustomRecordError> {
        let id = format!("custom_{}", Ulid::new());
        let created_at = to_rfc3339(record.created_at);
        sqlx::query(
            "INSERT INTO customs (id, coming_soon, product_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(i64::from(record.coming_soon))
        .bind(record.product_id)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(CustomRecord {
            id,
            coming_soon: record.coming_soon,
            product_id: record.product_id.map(str::to_string),
            created_at: record.created_at,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<CustomRecord>, CustomRecordError> {
        let row = sqlx::query(
            "SELECT id, coming_soon, product_id, created_at FROM customs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(CustomRecord::from_row).transpose()?)
    }

    /// Deletes the record when present. Returns whether a row was removed; an
    /// unknown id is not an error so compensation can be replayed safely.
    pub async fn delete_if_exists(&self, id: &str) -> Result<bool, CustomRecordError> {
        let result = sqlx::query("DELETE FROM customs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<CustomRecord>, CustomRecordError> {
        let rows = sqlx::query(
            "SELECT id, coming_soon, product_id, created_at FROM customs \
             WHERE product_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(CustomRecord::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CustomRecordError::from)
    }
}

#[derive(Debug, Error)]
pub enum CustomRecordError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `product_custom_links` table.
#[derive(Clone)]
pub struct ProductLinkRepository {
    pool: SqlitePool,
}

impl ProductLinkRepository {
    pub async fn create_link(
        &self,
        product_id: &str,
        custom_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        let result = sqlx::query(
            "INSERT INTO product_custom_links (product_id, custom_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(product_id)
        .bind(custom_id)
        .bind(to_rfc3339(created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) => {
                let code = db_err.code().map(Cow::into_owned);
                match code.as_deref() {
                    Some(SQLITE_CONSTRAINT_PRIMARYKEY) | Some(SQLITE_CONSTRAINT_UNIQUE) => {
                        Err(LinkError::Duplicate)
                    }
                    Some(SQLITE_CONSTRAINT_FOREIGNKEY) => {
                        Err(LinkError::MissingCustom(custom_id.to_string()))
                    }
                    _ => Err(LinkError::Database(sqlx::Error::Database(db_err))),
                }
            }
            Err(err) => Err(LinkError::Database(err)),
        }
    }

    /// Removes the link. Returns whether a link existed.
    pub async fn dismiss_link(&self, product_id: &str, custom_id: &str) -> Result<bool, LinkError> {
        let result =
            sqlx::query("DELETE FROM product_custom_links WHERE product_id = ? AND custom_id = ?")
                .bind(product_id)
                .bind(custom_id)
                .execute(&self.pool)
                .await
                .map_err(LinkError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Custom record linked to the product, if any.
    pub async fn linked_custom(&self, product_id: &str) -> Result<Option<CustomRecord>, LinkError> {
        let row = sqlx::query(
            "SELECT c.id, c.coming_soon, c.product_id, c.created_at \
               FROM product_custom_links AS l \
               JOIN customs AS c ON c.id = l.custom_id \
              WHERE l.product_id = ? \
              ORDER BY l.created_at ASC \
              LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LinkError::Database)?;

        row.as_ref()
            .map(CustomRecord::from_row)
            .transpose()
            .map_err(LinkError::Database)
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("product is already linked to this custom record")]
    Duplicate,
    #[error("custom record {0} does not exist")]
    MissingCustom(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

/// Persisted view of one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow: String,
    pub subject_id: String,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
}

/// Repository for `workflow_executions` and `workflow_steps`.
#[derive(Clone)]
pub struct WorkflowRepository {
    pool: SqlitePool,
}

impl WorkflowRepository {
    /// Creates a `running` execution and returns its id.
    pub async fn start_execution(
        &self,
        workflow: &str,
        subject_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<String, ExecutionLogError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO workflow_executions (id, workflow, subject_id, status, started_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workflow)
        .bind(subject_id)
        .bind(ExecutionStatus::Running.as_str())
        .bind(to_rfc3339(started_at))
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Inserts or updates the step row so it mirrors the in-memory log.
    pub async fn record_step(
        &self,
        execution_id: &str,
        position: usize,
        step: &StepRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<(), ExecutionLogError> {
        let result = sqlx::query(
            "INSERT INTO workflow_steps \
             (execution_id, position, name, status, compensation_input, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(execution_id, name) DO UPDATE \
             SET status = excluded.status, \
                 compensation_input = excluded.compensation_input, \
                 updated_at = excluded.updated_at",
        )
        .bind(execution_id)
        .bind(position as i64)
        .bind(&step.name)
        .bind(step.status.as_str())
        .bind(&step.compensation_input)
        .bind(to_rfc3339(updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code() == Some(Cow::Borrowed(SQLITE_CONSTRAINT_FOREIGNKEY)) =>
            {
                Err(ExecutionLogError::UnknownExecution(execution_id.to_string()))
            }
            Err(err) => Err(ExecutionLogError::Database(err)),
        }
    }

    pub async fn finish_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), ExecutionLogError> {
        let result = sqlx::query(
            "UPDATE workflow_executions SET status = ?, error = ?, finished_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(to_rfc3339(finished_at))
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExecutionLogError::UnknownExecution(execution_id.to_string()));
        }
        Ok(())
    }

    pub async fn load_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, ExecutionLogError> {
        let row = sqlx::query(
            "SELECT id, workflow, subject_id, status, error FROM workflow_executions WHERE id = ?",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        let status = ExecutionStatus::parse(&status)
            .ok_or_else(|| ExecutionLogError::InvalidStatus(status.clone()))?;

        let step_rows = sqlx::query(
            "SELECT name, status, compensation_input FROM workflow_steps \
             WHERE execution_id = ? ORDER BY position ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = Vec::with_capacity(step_rows.len());
        for step_row in step_rows {
            let raw: String = step_row.try_get("status")?;
            let status =
                StepStatus::parse(&raw).ok_or_else(|| ExecutionLogError::InvalidStatus(raw.clone()))?;
            steps.push(StepRecord {
                name: step_row.try_get("name")?,
                status,
                compensation_input: step_row.try_get("compensation_input")?,
            });
        }

        Ok(Some(ExecutionRecord {
            id: row.try_get("id")?,
            workflow: row.try_get("workflow")?,
            subject_id: row.try_get("subject_id")?,
            status,
            error: row.try_get("error")?,
            steps,
        }))
    }

    /// Most recent execution of `workflow` for the subject.
    pub async fn latest_for_subject(
        &self,
        workflow: &str,
        subject_id: &str,
    ) -> Result<Option<ExecutionRecord>, ExecutionLogError> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM workflow_executions WHERE workflow = ? AND subject_id = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(workflow)
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => self.load_execution(&id).await,
            None => Ok(None),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionLogError {
    #[error("workflow execution {0} does not exist")]
    UnknownExecution(String),
    #[error("unexpected status value {0}")]
    InvalidStatus(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Processing state of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Received,
    Processed,
    Failed,
    Ignored,
}

impl InboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxStatus::Received => "received",
            InboxStatus::Processed => "processed",
            InboxStatus::Failed => "failed",
            InboxStatus::Ignored => "ignored",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "received" => Some(InboxStatus::Received),
            "processed" => Some(InboxStatus::Processed),
            "failed" => Some(InboxStatus::Failed),
            "ignored" => Some(InboxStatus::Ignored),
            _ => None,
        }
    }
}

/// Data required to record an inbound event.
pub struct NewInboxEvent<'a> {
    pub msg_id: &'a str,
    pub name: &'a str,
    pub payload_json: &'a str,
    pub event_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// Result of recording an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    Inserted,
    /// The message id was seen before; carries the stored status and the
    /// updated delivery count.
    Redelivered { status: InboxStatus, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxEntry {
    pub msg_id: String,
    pub name: String,
    pub status: InboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Repository for the `event_inbox` table.
#[derive(Clone)]
pub struct EventInboxRepository {
    pool: SqlitePool,
}

impl EventInboxRepository {
    pub async fn record(&self, event: NewInboxEvent<'_>) -> Result<InboxOutcome, InboxError> {
        let received_at = to_rfc3339(event.received_at);
        let result = sqlx::query(
            "INSERT INTO event_inbox \
             (id, msg_id, name, payload_json, status, event_at, received_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(event.msg_id)
        .bind(event.name)
        .bind(event.payload_json)
        .bind(InboxStatus::Received.as_str())
        .bind(to_rfc3339(event.event_at))
        .bind(&received_at)
        .bind(&received_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InboxOutcome::Inserted),
            Err(sqlx::Error::Database(db_err))
                if db_err.code() == Some(Cow::Borrowed(SQLITE_CONSTRAINT_UNIQUE)) =>
            {
                let row = sqlx::query(
                    "UPDATE event_inbox SET attempts = attempts + 1, updated_at = ? \
                     WHERE msg_id = ? RETURNING status, attempts",
                )
                .bind(&received_at)
                .bind(event.msg_id)
                .fetch_one(&self.pool)
                .await?;
                let raw: String = row.try_get("status")?;
                let attempts: i64 = row.try_get("attempts")?;
                let status = InboxStatus::parse(&raw).ok_or(InboxError::InvalidStatus(raw))?;
                Ok(InboxOutcome::Redelivered {
                    status,
                    attempts: attempts as u32,
                })
            }
            Err(err) => Err(InboxError::Database(err)),
        }
    }

    pub async fn mark(
        &self,
        msg_id: &str,
        status: InboxStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), InboxError> {
        let result = sqlx::query(
            "UPDATE event_inbox SET status = ?, last_error = ?, updated_at = ? WHERE msg_id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(to_rfc3339(at))
        .bind(msg_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InboxError::NotFound(msg_id.to_string()));
        }
        Ok(())
    }

    pub async fn get(&self, msg_id: &str) -> Result<Option<InboxEntry>, InboxError> {
        let row = sqlx::query(
            "SELECT msg_id, name, status, attempts, last_error FROM event_inbox WHERE msg_id = ?",
        )
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("status")?;
        let attempts: i64 = row.try_get("attempts")?;
        let status = InboxStatus::parse(&raw).ok_or(InboxError::InvalidStatus(raw))?;
        Ok(Some(InboxEntry {
            msg_id: row.try_get("msg_id")?,
            name: row.try_get("name")?,
            status,
            attempts: attempts as u32,
            last_error: row.try_get("last_error")?,
        }))
    }
}

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("event {0} is not in the inbox")]
    NotFound(String),
    #[error("unexpected inbox status {0}")]
    InvalidStatus(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

/// One dispatch attempt to persist.
pub struct NewNotificationLog<'a> {
    pub event_msg_id: Option<&'a str>,
    pub recipient: &'a str,
    pub channel: &'a str,
    pub template: &'a str,
    pub status: NotificationStatus,
    pub error: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct NotificationLogEntry {
    pub id: String,
    pub event_msg_id: Option<String>,
    pub recipient: String,
    pub channel: String,
    pub template: String,
    pub status: String,
    pub error: Option<String>,
}

/// Repository for the `notifications` table.
#[derive(Clone)]
pub struct NotificationLogRepository {
    pool: SqlitePool,
}

impl NotificationLogRepository {
    pub async fn record(&self, entry: NewNotificationLog<'_>) -> Result<String, NotificationLogError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO notifications \
             (id, event_msg_id, recipient, channel, template, status, error, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(entry.event_msg_id)
        .bind(entry.recipient)
        .bind(entry.channel)
        .bind(entry.template)
        .bind(entry.status.as_str())
        .bind(entry.error)
        .bind(to_rfc3339(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Attempts recorded for an event, oldest first.
    pub async fn list_for_event(
        &self,
        msg_id: &str,
    ) -> Result<Vec<NotificationLogEntry>, NotificationLogError> {
        let rows = sqlx::query_as::<_, NotificationLogEntry>(
            "SELECT id, event_msg_id, recipient, channel, template, status, error \
               FROM notifications WHERE event_msg_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(msg_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(Debug, Error)]
pub enum NotificationLogError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
