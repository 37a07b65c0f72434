use crate::error::CoreError;
use crate::models::{Reminder, ReminderPage, ReminderPatch};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// How many records a change-feed snapshot carries.
pub(crate) const SNAPSHOT_PAGE_SIZE: u32 = 200;

/// Selects which records a change-feed subscription observes.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    pub user_id: String,
    pub family_id: Option<String>,
}

/// Internal write notification fanned out to change-feed pumps.
#[derive(Debug, Clone)]
pub(crate) struct ChangeEvent {
    pub users: Vec<String>,
}

impl ChangeEvent {
    pub(crate) fn touches(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u == user_id)
    }
}

/// Handle for a change-feed subscription.
///
/// The stream is infinite and not restartable: once cancelled (or dropped),
/// resubscribe to observe further changes. Cancellation unregisters the
/// listener deterministically rather than waiting for garbage collection.
pub struct StoreSubscription {
    receiver: mpsc::Receiver<Vec<Reminder>>,
    task: JoinHandle<()>,
}

impl StoreSubscription {
    /// The next updated record-list snapshot, or `None` once the feed is
    /// closed.
    pub async fn next_snapshot(&mut self) -> Option<Vec<Reminder>> {
        self.receiver.recv().await
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Document store collaborator.
///
/// Every operation is atomic per call and durable on return. Two
/// interchangeable implementations are selected at construction time:
/// [`SqliteStore`] for durable storage and [`MemoryStore`] as the
/// in-process fallback and test double.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, reminder: &Reminder) -> Result<Uuid, CoreError>;

    /// Version-checked partial update. A concurrent write to the same
    /// record surfaces as [`CoreError::StoreConflict`] for the caller to
    /// retry; the store never merges conflicting writes.
    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        patch: &ReminderPatch,
    ) -> Result<Reminder, CoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), CoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Reminder>, CoreError>;

    /// One page of the user's reminders: records they own plus records
    /// assigned to them, ordered by due date.
    async fn query_by_owner(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ReminderPage, CoreError>;

    /// Subscribe to record-list snapshots for the filtered user. A fresh
    /// snapshot is delivered after every write touching that user's list.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<StoreSubscription, CoreError>;
}

/// Shared change-feed pump: re-queries the store after each relevant write
/// and forwards the fresh snapshot to the subscriber.
pub(crate) fn spawn_snapshot_pump<S>(
    store: S,
    mut events: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
) -> StoreSubscription
where
    S: DocumentStore + Clone + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !event.touches(&filter.user_id) {
                        continue;
                    }
                    match store
                        .query_by_owner(&filter.user_id, 0, SNAPSHOT_PAGE_SIZE)
                        .await
                    {
                        Ok(page) => {
                            if tx.send(page.items).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(user_id = %filter.user_id, error = %err, "change-feed snapshot query failed");
                        }
                    }
                }
                // Missed events collapse into the next snapshot anyway.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    StoreSubscription { receiver: rx, task }
}
