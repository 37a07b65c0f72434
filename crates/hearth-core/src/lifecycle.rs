//! Reminder lifecycle controller.
//!
//! Owns the create/update/complete/delete transitions of a single reminder
//! and decides, on each transition, whether a new occurrence must be
//! materialized and which notifications must be (re)scheduled or cancelled.
//!
//! Within one transition, persistence of the reminder record happens before
//! notification reconciliation happens before cache invalidation: a caller
//! observing a finished transition holds a durable record even if
//! reconciliation partially failed. Notification errors are reported in the
//! result, never thrown; store conflicts are surfaced for the caller to
//! retry, never auto-retried here.

use crate::cache::FamilyReminderCache;
use crate::clock::Clock;
use crate::error::CoreError;
use crate::family::FamilyProvider;
use crate::models::{
    CompletionOutcome, EndCondition, NewReminderData, Reminder, ReminderPatch, ReminderStatus,
};
use crate::notifications::{NotificationSynchronizer, ReconcileReport, TeardownReport};
use crate::recurrence::next_occurrence;
use crate::store::DocumentStore;
use crate::timezone;
use chrono::Duration;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A successful transition plus the state of its notification side effects.
/// A rejected transition is a `CoreError`; a degraded one is `Ok` with a
/// non-clean report. The two must never collapse into one signal.
#[derive(Debug)]
pub struct CreateResult {
    pub reminder: Reminder,
    pub notifications: ReconcileReport,
}

#[derive(Debug)]
pub struct UpdateResult {
    pub reminder: Reminder,
    pub notifications: ReconcileReport,
}

#[derive(Debug)]
pub struct CompleteResult {
    pub outcome: CompletionOutcome,
    pub notifications: ReconcileReport,
}

#[derive(Debug)]
pub struct DeleteResult {
    pub reminder_id: Uuid,
    pub cleanup: TeardownReport,
}

pub struct ReminderLifecycle {
    store: Arc<dyn DocumentStore>,
    synchronizer: NotificationSynchronizer,
    cache: FamilyReminderCache,
    family: Arc<dyn FamilyProvider>,
    clock: Arc<dyn Clock>,
}

impl ReminderLifecycle {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        synchronizer: NotificationSynchronizer,
        cache: FamilyReminderCache,
        family: Arc<dyn FamilyProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            synchronizer,
            cache,
            family,
            clock,
        }
    }

    /// draft -> scheduled. For recurring reminders the due date is the
    /// first occurrence on or after the supplied start date.
    pub async fn create(&self, data: NewReminderData) -> Result<CreateResult, CoreError> {
        if data.title.trim().is_empty() {
            return Err(CoreError::InvalidInput("title must not be empty".to_string()));
        }
        if data.owner_id.is_empty() {
            return Err(CoreError::InvalidInput("owner id must not be empty".to_string()));
        }
        timezone::validate_timezone(&data.timezone)?;

        let due_date = match &data.recurrence {
            Some(rule) => {
                rule.validate()?;
                next_occurrence(rule, data.start_date, Some(data.start_date - Duration::days(1)))?
                    .ok_or_else(|| {
                        CoreError::InvalidRule(
                            "recurrence ends before its first occurrence".to_string(),
                        )
                    })?
            }
            None => data.start_date,
        };

        let now = self.clock.now();
        let reminder = Reminder {
            id: Uuid::now_v7(),
            owner_id: data.owner_id,
            family_id: data.family_id,
            title: data.title,
            notes: data.notes,
            due_date,
            due_time: data.due_time,
            timezone: data.timezone,
            anchor_date: data.start_date,
            recurrence: data.recurrence,
            completed_occurrences: 0,
            status: ReminderStatus::Scheduled,
            notification_policy: data.notification_policy,
            assignment: data.assignment,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.store.create(&reminder).await?;
        let notifications = self.synchronizer.reconcile(&reminder).await;
        self.invalidate_for(&reminder).await;

        info!(reminder_id = %reminder.id, due_date = %reminder.due_date, "reminder scheduled");
        Ok(CreateResult {
            reminder,
            notifications,
        })
    }

    /// Edit a scheduled reminder. Edits that move the due instant or change
    /// the notification policy tear down and reschedule the full
    /// notification set rather than patching it incrementally.
    pub async fn update(&self, id: Uuid, patch: ReminderPatch) -> Result<UpdateResult, CoreError> {
        let current = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if current.status != ReminderStatus::Scheduled {
            return Err(CoreError::InvalidInput(
                "only scheduled reminders can be edited".to_string(),
            ));
        }
        if patch.status.is_some()
            || patch.completed_at.is_some()
            || patch.completed_occurrences.is_some()
        {
            return Err(CoreError::InvalidInput(
                "completion state changes go through complete(), not update()".to_string(),
            ));
        }
        if let Some(Some(rule)) = &patch.recurrence {
            rule.validate()?;
        }
        if let Some(tz) = &patch.timezone {
            timezone::validate_timezone(tz)?;
        }

        let reschedule = patch.touches_timing();
        let updated = self.store.update(id, current.version, &patch).await?;

        let mut notifications = ReconcileReport::default();
        if reschedule {
            let teardown = self.synchronizer.teardown(id).await;
            notifications.cancelled += teardown.cancelled;
            notifications.errors.extend(teardown.errors);
        }
        notifications.absorb(self.synchronizer.reconcile(&updated).await);

        // Reassignment must refresh both the old and the new member lists.
        self.invalidate_for(&current).await;
        self.invalidate_for(&updated).await;

        info!(reminder_id = %id, rescheduled = reschedule, "reminder updated");
        Ok(UpdateResult {
            reminder: updated,
            notifications,
        })
    }

    /// scheduled -> completed. A recurring reminder whose end condition is
    /// not exhausted materializes exactly one successor instance carrying
    /// the same rule, assignment and policy; the completed instance is
    /// preserved as history.
    pub async fn complete(&self, id: Uuid) -> Result<CompleteResult, CoreError> {
        let current = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if current.status != ReminderStatus::Scheduled {
            return Err(CoreError::InvalidInput(
                "reminder is already completed".to_string(),
            ));
        }

        // Resolve the successor occurrence before touching the record, so a
        // malformed rule rejects the whole transition.
        let completed_count = current.completed_occurrences + 1;
        let next_date = match &current.recurrence {
            Some(rule) => {
                rule.validate()?;
                let count_exhausted = matches!(
                    rule.end,
                    EndCondition::AfterCount { count } if completed_count >= count
                );
                if count_exhausted {
                    None
                } else {
                    next_occurrence(rule, current.anchor_date, Some(current.due_date))?
                }
            }
            None => None,
        };

        let now = self.clock.now();
        let patch = ReminderPatch {
            status: Some(ReminderStatus::Completed),
            completed_at: Some(Some(now)),
            completed_occurrences: Some(completed_count),
            ..Default::default()
        };
        let completed = self.store.update(id, current.version, &patch).await?;

        let successor = match next_date {
            Some(due_date) => {
                let successor = Reminder {
                    id: Uuid::now_v7(),
                    owner_id: completed.owner_id.clone(),
                    family_id: completed.family_id.clone(),
                    title: completed.title.clone(),
                    notes: completed.notes.clone(),
                    due_date,
                    due_time: completed.due_time,
                    timezone: completed.timezone.clone(),
                    anchor_date: completed.anchor_date,
                    recurrence: completed.recurrence.clone(),
                    completed_occurrences: completed_count,
                    status: ReminderStatus::Scheduled,
                    notification_policy: completed.notification_policy.clone(),
                    assignment: completed.assignment.clone(),
                    version: 1,
                    created_at: now,
                    updated_at: now,
                    completed_at: None,
                };
                self.store.create(&successor).await?;
                Some(successor)
            }
            None => None,
        };

        let mut notifications = self.synchronizer.reconcile(&completed).await;
        if let Some(successor) = &successor {
            notifications.absorb(self.synchronizer.reconcile(successor).await);
        }
        self.invalidate_for(&completed).await;

        info!(
            reminder_id = %id,
            successor = %successor.as_ref().map(|s| s.id.to_string()).unwrap_or_default(),
            "reminder completed"
        );
        let outcome = if completed.is_recurring() {
            CompletionOutcome::Recurring {
                completed,
                successor,
            }
        } else {
            CompletionOutcome::OneShot(completed)
        };
        Ok(CompleteResult {
            outcome,
            notifications,
        })
    }

    /// scheduled -> deleted, for this instance only: successors already
    /// materialized are unaffected and no new successor is generated.
    /// Notification cleanup is advisory; it never rolls back the deletion.
    pub async fn delete(&self, id: Uuid) -> Result<DeleteResult, CoreError> {
        let current = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

        self.store.delete(id).await?;
        let cleanup = self.synchronizer.teardown(id).await;
        self.invalidate_for(&current).await;

        info!(reminder_id = %id, clean = cleanup.is_clean(), "reminder deleted");
        Ok(DeleteResult {
            reminder_id: id,
            cleanup,
        })
    }

    /// Invalidate cached lists for everyone who can see this reminder: the
    /// owner, the assigned members, and the rest of the owning family.
    async fn invalidate_for(&self, reminder: &Reminder) {
        let mut users = reminder.affected_users();
        if let Some(family_id) = &reminder.family_id {
            if let Ok(members) = self.family.member_ids(family_id).await {
                for member in members {
                    if !users.contains(&member) {
                        users.push(member);
                    }
                }
            }
        }
        for user in users {
            self.cache.invalidate(&user).await;
        }
    }
}
