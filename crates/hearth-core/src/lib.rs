//! # Hearth Core Library
//!
//! The engine behind the Hearth family reminder app: deterministic,
//! timezone-correct recurrence, notification synchronization against an
//! at-least-once delivery transport, and a bounded-staleness cache of
//! family reminder lists.
//!
//! ## Features
//!
//! - **Bounded Recurrence**: the product's pattern set (fixed-interval
//!   daily/weekly/monthly/yearly, explicit weekday sets, ordinal weekdays
//!   like "first Monday") as pure calendar math with month-end clamping
//! - **Timezone Awareness**: due dates live in the reminder's own IANA
//!   zone with explicit DST-gap handling, never in device-local time
//! - **Idempotent Notification Sync**: deterministic identifiers make
//!   reconcile and teardown safe to re-run against an external transport
//! - **Family Reminder Cache**: replace-only cached pages with explicit
//!   invalidation and a real-time change feed
//! - **Injected Time**: every component reads the clock through an
//!   adapter, so tests pin the instant
//!
//! ## Core Modules
//!
//! - [`clock`]: clock/timezone adapter with system and fixed implementations
//! - [`models`]: reminder records, recurrence rules, transfer objects
//! - [`recurrence`]: the occurrence generator
//! - [`lifecycle`]: create/update/complete/delete transitions
//! - [`notifications`]: notification synchronizer and transport seam
//! - [`cache`]: per-(user, family) reminder list cache
//! - [`store`]: document store seam with SQLite and in-memory backends
//! - [`family`]: read-only family membership collaborator
//! - [`db`]: SQLite connection and schema bootstrap
//! - [`timezone`]: IANA zone utilities
//! - [`error`]: error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use hearth_core::{
//!     cache::{CacheConfig, FamilyReminderCache},
//!     clock::SystemClock,
//!     db,
//!     family::StaticFamilyProvider,
//!     lifecycle::ReminderLifecycle,
//!     models::{NewReminderData, NotificationPolicy, RecurrenceRule},
//!     notifications::{InMemoryTransport, NotificationSynchronizer, SyncConfig},
//!     store::SqliteStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let clock = Arc::new(SystemClock);
//!     let pool = db::establish_connection("reminders.db").await?;
//!     let store = Arc::new(SqliteStore::new(pool, clock.clone()));
//!
//!     let synchronizer = NotificationSynchronizer::new(
//!         Arc::new(InMemoryTransport::new()),
//!         clock.clone(),
//!         SyncConfig::default(),
//!     );
//!     let cache = FamilyReminderCache::new(store.clone(), clock.clone(), CacheConfig::default());
//!     let lifecycle = ReminderLifecycle::new(
//!         store,
//!         synchronizer,
//!         cache,
//!         Arc::new(StaticFamilyProvider::new()),
//!         clock,
//!     );
//!
//!     let data = NewReminderData {
//!         owner_id: "user-1".to_string(),
//!         title: "Water the plants".to_string(),
//!         start_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
//!         timezone: "Europe/London".to_string(),
//!         recurrence: Some(RecurrenceRule::daily(3)?),
//!         notification_policy: NotificationPolicy::new(vec![15]),
//!         ..Default::default()
//!     };
//!
//!     let created = lifecycle.create(data).await?;
//!     println!("Scheduled for {}", created.reminder.due_date);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod db;
pub mod error;
pub mod family;
pub mod lifecycle;
pub mod models;
pub mod notifications;
pub mod recurrence;
pub mod store;
pub mod timezone;
pub mod timing;
