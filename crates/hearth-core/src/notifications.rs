//! Notification synchronization.
//!
//! Reconciles the notifications that *should* exist for a reminder against
//! the ones registered with the delivery transport. Identifiers are a pure
//! function of `(reminder id, occurrence anchor date, offset)`, so
//! re-deriving them for the same occurrence always yields the same id and
//! duplicate schedule calls are harmless under the transport's
//! at-least-once delivery.

use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::{Reminder, ReminderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Deterministic notification identifier.
///
/// Any two implementations computing the same inputs must produce the same
/// identifier; the reminder id prefix is what the cleanup strategies match
/// on.
pub fn notification_identifier(
    reminder_id: Uuid,
    occurrence_anchor: NaiveDate,
    offset_minutes: i64,
) -> String {
    format!(
        "{}_{}_{}m",
        reminder_id,
        occurrence_anchor.format("%Y%m%d"),
        offset_minutes
    )
}

/// One notification the transport should fire.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub identifier: String,
    pub reminder_id: Uuid,
    pub offset_minutes: i64,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

/// One notification currently registered with the transport. The owner
/// reference is metadata the transport may or may not preserve, which is
/// why teardown also matches on identifier shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledNotification {
    pub identifier: String,
    pub fire_at: DateTime<Utc>,
    pub owner_reference: Option<String>,
}

/// Delivery transport collaborator: at-least-once local or remote delivery.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn schedule(&self, request: &NotificationRequest) -> Result<(), CoreError>;

    /// Cancelling an unknown identifier is a successful no-op.
    async fn cancel(&self, identifier: &str) -> Result<(), CoreError>;

    async fn list_scheduled(&self) -> Result<Vec<ScheduledNotification>, CoreError>;
}

/// In-process [`DeliveryTransport`] used in local mode and tests.
#[derive(Default)]
pub struct InMemoryTransport {
    scheduled: Mutex<HashMap<String, ScheduledNotification>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryTransport for InMemoryTransport {
    async fn schedule(&self, request: &NotificationRequest) -> Result<(), CoreError> {
        self.scheduled.lock().unwrap().insert(
            request.identifier.clone(),
            ScheduledNotification {
                identifier: request.identifier.clone(),
                fire_at: request.fire_at,
                owner_reference: Some(request.reminder_id.to_string()),
            },
        );
        Ok(())
    }

    async fn cancel(&self, identifier: &str) -> Result<(), CoreError> {
        self.scheduled.lock().unwrap().remove(identifier);
        Ok(())
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledNotification>, CoreError> {
        Ok(self.scheduled.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bound on each individual transport call; a timed-out call is a
    /// recoverable error retried on the next reconcile, not internally.
    pub transport_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transport_timeout_ms: 5_000,
        }
    }
}

/// Result of one reconcile pass. Errors here are partial-success detail,
/// not failures of the pass itself.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub cancelled: usize,
    pub errors: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another report into this one (e.g. completed instance plus its
    /// successor).
    pub fn absorb(&mut self, other: ReconcileReport) {
        self.scheduled += other.scheduled;
        self.cancelled += other.cancelled;
        self.errors.extend(other.errors);
    }
}

/// Result of a best-effort notification teardown.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub cancelled: usize,
    pub errors: Vec<String>,
    /// Identifiers still registered after cleanup, per the verification
    /// re-query. Non-fatal: the transport is external and cleanup retries
    /// on the next pass.
    pub remaining: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.remaining.is_empty()
    }
}

/// Reconciles desired against actual notification state for a reminder.
pub struct NotificationSynchronizer {
    transport: Arc<dyn DeliveryTransport>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl NotificationSynchronizer {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            clock,
            config,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let timeout = std::time::Duration::from_millis(self.config.transport_timeout_ms);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::TransportUnavailable(format!(
                "call exceeded {}ms",
                self.config.transport_timeout_ms
            ))),
        }
    }

    /// The notifications that should exist for this reminder right now:
    /// one per enabled lead-time offset, skipping fire-times already in the
    /// past. Completed reminders want no notifications.
    pub fn desired_requests(&self, reminder: &Reminder) -> Result<Vec<NotificationRequest>, CoreError> {
        if !reminder.notification_policy.enabled || reminder.status != ReminderStatus::Scheduled {
            return Ok(Vec::new());
        }

        let due_instant = reminder.due_instant()?;
        let now = self.clock.now();

        let mut requests = Vec::with_capacity(reminder.notification_policy.lead_times_minutes.len());
        for &offset in &reminder.notification_policy.lead_times_minutes {
            let fire_at = due_instant - Duration::minutes(offset);
            if fire_at <= now {
                continue;
            }
            requests.push(NotificationRequest {
                identifier: notification_identifier(reminder.id, reminder.due_date, offset),
                reminder_id: reminder.id,
                offset_minutes: offset,
                fire_at,
                title: reminder.title.clone(),
                body: format!("Due {}", reminder.due_date.format("%Y-%m-%d")),
            });
        }
        Ok(requests)
    }

    /// Bring the transport's state for this reminder in line with the
    /// desired set. Idempotent: a second call with no intervening state
    /// change schedules and cancels nothing.
    pub async fn reconcile(&self, reminder: &Reminder) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let desired = match self.desired_requests(reminder) {
            Ok(desired) => desired,
            Err(err) => {
                report
                    .errors
                    .push(format!("computing desired notifications: {}", err));
                return report;
            }
        };

        let prefix = format!("{}_", reminder.id);
        // If the listing fails we fall back to an empty actual set: the
        // identifiers are idempotent, so re-scheduling is harmless, and
        // stray entries get cancelled on the next pass.
        let actual: Vec<ScheduledNotification> = match self
            .bounded(self.transport.list_scheduled())
            .await
        {
            Ok(list) => list
                .into_iter()
                .filter(|n| n.identifier.starts_with(&prefix))
                .collect(),
            Err(err) => {
                report.errors.push(format!("listing scheduled: {}", err));
                Vec::new()
            }
        };

        let desired_ids: HashSet<&str> = desired.iter().map(|r| r.identifier.as_str()).collect();
        let actual_ids: HashSet<&str> = actual.iter().map(|n| n.identifier.as_str()).collect();

        for notification in &actual {
            if desired_ids.contains(notification.identifier.as_str()) {
                continue;
            }
            match self.bounded(self.transport.cancel(&notification.identifier)).await {
                Ok(()) => report.cancelled += 1,
                Err(err) => report
                    .errors
                    .push(format!("cancelling {}: {}", notification.identifier, err)),
            }
        }

        for request in &desired {
            if actual_ids.contains(request.identifier.as_str()) {
                continue;
            }
            match self.bounded(self.transport.schedule(request)).await {
                Ok(()) => report.scheduled += 1,
                Err(err) => report
                    .errors
                    .push(format!("scheduling {}: {}", request.identifier, err)),
            }
        }

        debug!(
            reminder_id = %reminder.id,
            scheduled = report.scheduled,
            cancelled = report.cancelled,
            errors = report.errors.len(),
            "notification reconcile"
        );
        report
    }

    /// Cancel everything the transport holds for this reminder, via three
    /// complementary strategies: the transport is an external system that
    /// may not expose owner metadata reliably, so each strategy runs even
    /// when another fails.
    pub async fn teardown(&self, reminder_id: Uuid) -> TeardownReport {
        let mut report = TeardownReport::default();
        let owner_ref = reminder_id.to_string();
        let prefix = format!("{}_", reminder_id);
        let mut cancelled: HashSet<String> = HashSet::new();
        let mut seen_exact = false;

        // Strategy 1: owner-reference metadata match.
        match self.bounded(self.transport.list_scheduled()).await {
            Ok(list) => {
                for notification in &list {
                    if notification.identifier == owner_ref {
                        seen_exact = true;
                    }
                    if notification.owner_reference.as_deref() != Some(owner_ref.as_str()) {
                        continue;
                    }
                    match self.bounded(self.transport.cancel(&notification.identifier)).await {
                        Ok(()) => {
                            cancelled.insert(notification.identifier.clone());
                        }
                        Err(err) => report
                            .errors
                            .push(format!("owner-reference cancel {}: {}", notification.identifier, err)),
                    }
                }
            }
            Err(err) => report
                .errors
                .push(format!("owner-reference lookup: {}", err)),
        }

        // Strategy 2: exact-id match (legacy single-notification scheme).
        match self.bounded(self.transport.cancel(&owner_ref)).await {
            Ok(()) => {
                if seen_exact {
                    cancelled.insert(owner_ref.clone());
                }
            }
            Err(err) => report.errors.push(format!("exact-id cancel: {}", err)),
        }

        // Strategy 3: identifier prefix match.
        match self.bounded(self.transport.list_scheduled()).await {
            Ok(list) => {
                for notification in list {
                    if !notification.identifier.starts_with(&prefix) {
                        continue;
                    }
                    if cancelled.contains(&notification.identifier) {
                        continue;
                    }
                    match self.bounded(self.transport.cancel(&notification.identifier)).await {
                        Ok(()) => {
                            cancelled.insert(notification.identifier.clone());
                        }
                        Err(err) => report
                            .errors
                            .push(format!("prefix cancel {}: {}", notification.identifier, err)),
                    }
                }
            }
            Err(err) => report.errors.push(format!("prefix lookup: {}", err)),
        }

        report.cancelled = cancelled.len();

        // Verification pass: anything still matching is reported, not
        // retried here.
        match self.bounded(self.transport.list_scheduled()).await {
            Ok(list) => {
                for notification in list {
                    let matches = notification.identifier == owner_ref
                        || notification.identifier.starts_with(&prefix)
                        || notification.owner_reference.as_deref() == Some(owner_ref.as_str());
                    if matches {
                        report.remaining.push(notification.identifier);
                    }
                }
            }
            Err(err) => report.errors.push(format!("verification lookup: {}", err)),
        }

        if !report.remaining.is_empty() {
            warn!(
                reminder_id = %reminder_id,
                remaining = report.remaining.len(),
                "notification teardown left registered entries"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{NotificationPolicy, RecurrenceRule};
    use chrono::{NaiveDate, NaiveTime};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn clock_at(y: i32, m: u32, d: u32, h: u32) -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            date(y, m, d).and_hms_opt(h, 0, 0).unwrap().and_utc(),
        ))
    }

    fn london_reminder() -> Reminder {
        let now = date(2024, 1, 10).and_hms_opt(8, 0, 0).unwrap().and_utc();
        Reminder {
            id: Uuid::now_v7(),
            owner_id: "user-1".to_string(),
            family_id: None,
            title: "Dentist".to_string(),
            notes: None,
            due_date: date(2024, 1, 15),
            due_time: Some(NaiveTime::from_hms_opt(14, 0, 0).unwrap()),
            timezone: "Europe/London".to_string(),
            anchor_date: date(2024, 1, 15),
            recurrence: None,
            completed_occurrences: 0,
            status: ReminderStatus::Scheduled,
            notification_policy: NotificationPolicy::new(vec![15, 1440]),
            assignment: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn synchronizer(
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<FixedClock>,
    ) -> NotificationSynchronizer {
        NotificationSynchronizer::new(transport, clock, SyncConfig::default())
    }

    #[test]
    fn test_identifier_is_deterministic_and_prefixed() {
        let id = Uuid::now_v7();
        let anchor = date(2024, 1, 15);

        let a = notification_identifier(id, anchor, 15);
        let b = notification_identifier(id, anchor, 15);
        assert_eq!(a, b);
        assert!(a.starts_with(&format!("{}_", id)));
        assert_ne!(a, notification_identifier(id, anchor, 30));
        assert_ne!(a, notification_identifier(id, date(2024, 1, 16), 15));
    }

    #[test]
    fn test_desired_fire_ats_in_reminder_zone() {
        let sync = synchronizer(Arc::new(InMemoryTransport::new()), clock_at(2024, 1, 10, 8));
        let reminder = london_reminder();

        let desired = sync.desired_requests(&reminder).unwrap();
        // London is on UTC in January: 15min before 14:00 and 1 day before.
        let fire_ats: Vec<String> = desired.iter().map(|r| r.fire_at.to_rfc3339()).collect();
        assert_eq!(
            fire_ats,
            vec![
                "2024-01-15T13:45:00+00:00".to_string(),
                "2024-01-14T14:00:00+00:00".to_string(),
            ]
        );
    }

    #[test]
    fn test_desired_skips_past_fire_ats() {
        // Clock after the 1-day offset but before the 15-minute one.
        let sync = synchronizer(Arc::new(InMemoryTransport::new()), clock_at(2024, 1, 15, 10));
        let reminder = london_reminder();

        let desired = sync.desired_requests(&reminder).unwrap();
        assert_eq!(desired.len(), 1);
        assert_eq!(desired[0].offset_minutes, 15);
    }

    #[test]
    fn test_desired_empty_when_disabled_or_completed() {
        let sync = synchronizer(Arc::new(InMemoryTransport::new()), clock_at(2024, 1, 10, 8));

        let mut disabled = london_reminder();
        disabled.notification_policy.enabled = false;
        assert!(sync.desired_requests(&disabled).unwrap().is_empty());

        let mut completed = london_reminder();
        completed.status = ReminderStatus::Completed;
        assert!(sync.desired_requests(&completed).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let transport = Arc::new(InMemoryTransport::new());
        let sync = synchronizer(transport.clone(), clock_at(2024, 1, 10, 8));
        let reminder = london_reminder();

        let first = sync.reconcile(&reminder).await;
        assert_eq!(first.scheduled, 2);
        assert_eq!(first.cancelled, 0);
        assert!(first.is_clean());

        let second = sync.reconcile(&reminder).await;
        assert_eq!(second.scheduled, 0);
        assert_eq!(second.cancelled, 0);
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_reconcile_cancels_superseded_entries() {
        let transport = Arc::new(InMemoryTransport::new());
        let sync = synchronizer(transport.clone(), clock_at(2024, 1, 10, 8));
        let mut reminder = london_reminder();

        sync.reconcile(&reminder).await;
        assert_eq!(transport.scheduled_count(), 2);

        // Moving the due date supersedes both previous identifiers.
        reminder.due_date = date(2024, 1, 20);
        let report = sync.reconcile(&reminder).await;
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.scheduled, 2);
        assert_eq!(transport.scheduled_count(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_handles_recurring_reminders() {
        let transport = Arc::new(InMemoryTransport::new());
        let sync = synchronizer(transport.clone(), clock_at(2024, 1, 10, 8));
        let mut reminder = london_reminder();
        reminder.recurrence = Some(RecurrenceRule::daily(1).unwrap());

        let report = sync.reconcile(&reminder).await;
        assert_eq!(report.scheduled, 2);
    }

    #[tokio::test]
    async fn test_teardown_cancels_all_matching_shapes() {
        let transport = Arc::new(InMemoryTransport::new());
        let clock = clock_at(2024, 1, 10, 8);
        let sync = synchronizer(transport.clone(), clock.clone());
        let reminder = london_reminder();

        sync.reconcile(&reminder).await;
        // A legacy entry identified by the bare reminder id, with no owner
        // metadata.
        transport.scheduled.lock().unwrap().insert(
            reminder.id.to_string(),
            ScheduledNotification {
                identifier: reminder.id.to_string(),
                fire_at: clock.now(),
                owner_reference: None,
            },
        );

        let report = sync.teardown(reminder.id).await;
        assert_eq!(report.cancelled, 3);
        assert!(report.remaining.is_empty());
        assert_eq!(transport.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_ignores_other_reminders() {
        let transport = Arc::new(InMemoryTransport::new());
        let sync = synchronizer(transport.clone(), clock_at(2024, 1, 10, 8));
        let reminder = london_reminder();
        let other = {
            let mut other = london_reminder();
            other.id = Uuid::now_v7();
            other
        };

        sync.reconcile(&reminder).await;
        sync.reconcile(&other).await;
        assert_eq!(transport.scheduled_count(), 4);

        sync.teardown(reminder.id).await;
        assert_eq!(transport.scheduled_count(), 2);
    }
}
