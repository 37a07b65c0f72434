use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::{Reminder, ReminderPage, ReminderPatch, ALL_DAY_FIRE_TIME};
use crate::store::{
    spawn_snapshot_pump, ChangeEvent, ChangeFilter, DocumentStore, StoreSubscription,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// In-process [`DocumentStore`]: the fallback implementation used when no
/// durable backend is configured, and the default test double.
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<Uuid, Reminder>>>,
    events: broadcast::Sender<ChangeEvent>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            events,
            clock,
        }
    }

    fn emit(&self, users: Vec<String>) {
        // No subscribers is fine; the send result only signals that.
        let _ = self.events.send(ChangeEvent { users });
    }

    fn user_list(records: &HashMap<Uuid, Reminder>, user_id: &str) -> Vec<Reminder> {
        let mut items: Vec<Reminder> = records
            .values()
            .filter(|r| r.owner_id == user_id || r.assignment.iter().any(|a| a == user_id))
            .cloned()
            .collect();
        items.sort_by_key(|r| {
            (
                r.due_date,
                r.due_time.unwrap_or(ALL_DAY_FIRE_TIME),
                r.created_at,
            )
        });
        items
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, reminder: &Reminder) -> Result<Uuid, CoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&reminder.id) {
            return Err(CoreError::InvalidInput(format!(
                "Reminder {} already exists",
                reminder.id
            )));
        }
        records.insert(reminder.id, reminder.clone());
        let users = reminder.affected_users();
        drop(records);

        self.emit(users);
        Ok(reminder.id)
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        patch: &ReminderPatch,
    ) -> Result<Reminder, CoreError> {
        let mut records = self.records.write().await;
        let current = records
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

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
        let updated = current.clone();
        drop(records);

        // Reassignment must invalidate both the old and new member lists.
        for user in updated.affected_users() {
            if !users.contains(&user) {
                users.push(user);
            }
        }
        self.emit(users);
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let mut records = self.records.write().await;
        let removed = records
            .remove(&id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        drop(records);

        self.emit(removed.affected_users());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Reminder>, CoreError> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn query_by_owner(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ReminderPage, CoreError> {
        let records = self.records.read().await;
        let all = Self::user_list(&records, user_id);

        let total_count = all.len() as u32;
        let start = (page as usize) * (page_size as usize);
        let items: Vec<Reminder> = all.into_iter().skip(start).take(page_size as usize).collect();
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
