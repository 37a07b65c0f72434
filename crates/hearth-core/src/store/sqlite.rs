use crate::clock::Clock;
use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    NotificationPolicy, RecurrenceRule, Reminder, ReminderPage, ReminderPatch, ReminderStatus,
};
use crate::store::{
    spawn_snapshot_pump, ChangeEvent, ChangeFilter, DocumentStore, StoreSubscription,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Durable [`DocumentStore`] backed by SQLite.
///
/// Structured fields (recurrence rule, notification policy, assignment) are
/// stored as JSON text columns; everything queried on has its own column.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    events: broadcast::Sender<ChangeEvent>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            pool,
            events,
            clock,
        }
    }

    fn emit(&self, users: Vec<String>) {
        let _ = self.events.send(ChangeEvent { users });
    }
}

#[derive(Debug, FromRow)]
struct ReminderRow {
    id: Uuid,
    owner_id: String,
    family_id: Option<String>,
    title: String,
    notes: Option<String>,
    due_date: NaiveDate,
    due_time: Option<NaiveTime>,
    timezone: String,
    anchor_date: NaiveDate,
    recurrence: Option<String>,
    completed_occurrences: i64,
    status: ReminderStatus,
    notification_policy: String,
    assignment: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReminderRow> for Reminder {
    type Error = CoreError;

    fn try_from(row: ReminderRow) -> Result<Self, Self::Error> {
        let recurrence: Option<RecurrenceRule> = row
            .recurrence
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let notification_policy: NotificationPolicy =
            serde_json::from_str(&row.notification_policy)?;
        let assignment: Vec<String> = serde_json::from_str(&row.assignment)?;

        Ok(Reminder {
            id: row.id,
            owner_id: row.owner_id,
            family_id: row.family_id,
            title: row.title,
            notes: row.notes,
            due_date: row.due_date,
            due_time: row.due_time,
            timezone: row.timezone,
            anchor_date: row.anchor_date,
            recurrence,
            completed_occurrences: row.completed_occurrences as u32,
            status: row.status,
            notification_policy,
            assignment,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

const USER_FILTER: &str = r#"(owner_id = $1
    OR EXISTS (SELECT 1 FROM json_each(reminders.assignment) WHERE json_each.value = $1))"#;

async fn write_row<'e, E>(executor: E, reminder: &Reminder, sql: &str) -> Result<(), CoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let recurrence = reminder
        .recurrence
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let notification_policy = serde_json::to_string(&reminder.notification_policy)?;
    let assignment = serde_json::to_string(&reminder.assignment)?;

    sqlx::query(sql)
        .bind(reminder.id)
        .bind(&reminder.owner_id)
        .bind(&reminder.family_id)
        .bind(&reminder.title)
        .bind(&reminder.notes)
        .bind(reminder.due_date)
        .bind(reminder.due_time)
        .bind(&reminder.timezone)
        .bind(reminder.anchor_date)
        .bind(recurrence)
        .bind(reminder.completed_occurrences as i64)
        .bind(&reminder.status)
        .bind(notification_policy)
        .bind(assignment)
        .bind(reminder.version)
        .bind(reminder.created_at)
        .bind(reminder.updated_at)
        .bind(reminder.completed_at)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, reminder: &Reminder) -> Result<Uuid, CoreError> {
        write_row(
            &self.pool,
            reminder,
            r#"INSERT INTO reminders (
                id, owner_id, family_id, title, notes, due_date, due_time, timezone,
                anchor_date, recurrence, completed_occurrences, status,
                notification_policy, assignment, version, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"#,
        )
        .await?;

        self.emit(reminder.affected_users());
        Ok(reminder.id)
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        patch: &ReminderPatch,
    ) -> Result<Reminder, CoreError> {
        let mut tx = self.pool.begin().await?;

        let row: ReminderRow = sqlx::query_as("SELECT * FROM reminders WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let mut current = Reminder::try_from(row)?;

        if current.version != expected_version {
            return Err(CoreError::StoreConflict {
                id: id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }

        let mut users = current.affected_users();
        current.apply_patch(patch);
        current.version += 1;
        current.updated_at = self.clock.now();

        let recurrence = current
            .recurrence
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let notification_policy = serde_json::to_string(&current.notification_policy)?;
        let assignment = serde_json::to_string(&current.assignment)?;

        let result = sqlx::query(
            r#"UPDATE reminders SET
                owner_id = $2, family_id = $3, title = $4, notes = $5, due_date = $6,
                due_time = $7, timezone = $8, anchor_date = $9, recurrence = $10,
                completed_occurrences = $11, status = $12, notification_policy = $13,
                assignment = $14, version = $15, updated_at = $16, completed_at = $17
            WHERE id = $1 AND version = $18"#,
        )
        .bind(current.id)
        .bind(&current.owner_id)
        .bind(&current.family_id)
        .bind(&current.title)
        .bind(&current.notes)
        .bind(current.due_date)
        .bind(current.due_time)
        .bind(&current.timezone)
        .bind(current.anchor_date)
        .bind(recurrence)
        .bind(current.completed_occurrences as i64)
        .bind(&current.status)
        .bind(notification_policy)
        .bind(assignment)
        .bind(current.version)
        .bind(current.updated_at)
        .bind(current.completed_at)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Raced with another writer between the read and the guard.
            return Err(CoreError::StoreConflict {
                id: id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }

        tx.commit().await?;

        for user in current.affected_users() {
            if !users.contains(&user) {
                users.push(user);
            }
        }
        self.emit(users);
        Ok(current)
    }

    async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let row: Option<ReminderRow> = sqlx::query_as("SELECT * FROM reminders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let removed = match row {
            Some(row) => Reminder::try_from(row)?,
            None => return Err(CoreError::NotFound(id.to_string())),
        };

        let result = sqlx::query("DELETE FROM reminders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(id.to_string()));
        }

        self.emit(removed.affected_users());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Reminder>, CoreError> {
        let row: Option<ReminderRow> = sqlx::query_as("SELECT * FROM reminders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Reminder::try_from).transpose()
    }

    async fn query_by_owner(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ReminderPage, CoreError> {
        let total: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM reminders WHERE {}",
            USER_FILTER
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            r#"SELECT * FROM reminders WHERE {}
            ORDER BY due_date, COALESCE(due_time, '09:00:00'), created_at
            LIMIT $2 OFFSET $3"#,
            USER_FILTER
        ))
        .bind(user_id)
        .bind(page_size as i64)
        .bind(page as i64 * page_size as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Reminder::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let total_count = total.0 as u32;
        let has_more = ((page + 1) as u64) * (page_size as u64) < total_count as u64;

        Ok(ReminderPage {
            items,
            has_more,
            total_count,
        })
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<StoreSubscription, CoreError> {
        Ok(spawn_snapshot_pump(
            self.clone(),
            self.events.subscribe(),
            filter,
        ))
    }
}
