use crate::error::CoreError;
use crate::timezone;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Notification anchor for all-day reminders (no explicit due time).
pub const ALL_DAY_FIRE_TIME: NaiveTime = match NaiveTime::from_hms_opt(9, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn to_chrono(self) -> Weekday {
        match self {
            DayOfWeek::Mon => Weekday::Mon,
            DayOfWeek::Tue => Weekday::Tue,
            DayOfWeek::Wed => Weekday::Wed,
            DayOfWeek::Thu => Weekday::Thu,
            DayOfWeek::Fri => Weekday::Fri,
            DayOfWeek::Sat => Weekday::Sat,
            DayOfWeek::Sun => Weekday::Sun,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayOfWeek::Mon,
            Weekday::Tue => DayOfWeek::Tue,
            Weekday::Wed => DayOfWeek::Wed,
            Weekday::Thu => DayOfWeek::Thu,
            Weekday::Fri => DayOfWeek::Fri,
            Weekday::Sat => DayOfWeek::Sat,
            Weekday::Sun => DayOfWeek::Sun,
        }
    }
}

impl std::fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DayOfWeek::Mon => "mon",
            DayOfWeek::Tue => "tue",
            DayOfWeek::Wed => "wed",
            DayOfWeek::Thu => "thu",
            DayOfWeek::Fri => "fri",
            DayOfWeek::Sat => "sat",
            DayOfWeek::Sun => "sun",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid day of week: {0}")]
pub struct ParseDayOfWeekError(String);

impl FromStr for DayOfWeek {
    type Err = ParseDayOfWeekError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mon" | "monday" => Ok(DayOfWeek::Mon),
            "tue" | "tuesday" => Ok(DayOfWeek::Tue),
            "wed" | "wednesday" => Ok(DayOfWeek::Wed),
            "thu" | "thursday" => Ok(DayOfWeek::Thu),
            "fri" | "friday" => Ok(DayOfWeek::Fri),
            "sat" | "saturday" => Ok(DayOfWeek::Sat),
            "sun" | "sunday" => Ok(DayOfWeek::Sun),
            _ => Err(ParseDayOfWeekError(s.to_string())),
        }
    }
}

/// Position of a weekday within its month, e.g. (First, Mon) or (Last, Fri).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ordinal {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl std::fmt::Display for Ordinal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Ordinal::First => "first",
            Ordinal::Second => "second",
            Ordinal::Third => "third",
            Ordinal::Fourth => "fourth",
            Ordinal::Last => "last",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid ordinal: {0}")]
pub struct ParseOrdinalError(String);

impl FromStr for Ordinal {
    type Err = ParseOrdinalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" | "1st" => Ok(Ordinal::First),
            "second" | "2nd" => Ok(Ordinal::Second),
            "third" | "3rd" => Ok(Ordinal::Third),
            "fourth" | "4th" => Ok(Ordinal::Fourth),
            "last" => Ok(Ordinal::Last),
            _ => Err(ParseOrdinalError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    WeeklyOnDays,
    OrdinalWeekdayOfMonth,
}

/// When a recurring series stops producing occurrences.
///
/// `AfterCount` counts *completed* occurrences and is tracked by the
/// lifecycle controller on the reminder record; the generator itself is
/// stateless and count-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EndCondition {
    #[default]
    Never,
    OnDate {
        date: NaiveDate,
    },
    AfterCount {
        count: u32,
    },
}

/// Immutable description of how a reminder repeats.
///
/// Validated at construction; an invalid rule is rejected with
/// `CoreError::InvalidRule`, never silently coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub kind: RecurrenceKind,
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<DayOfWeek>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<Ordinal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<DayOfWeek>,
    #[serde(default)]
    pub end: EndCondition,
}

impl RecurrenceRule {
    pub fn daily(interval: u32) -> Result<Self, CoreError> {
        Self::new(RecurrenceKind::Daily, interval)
    }

    pub fn weekly(interval: u32) -> Result<Self, CoreError> {
        Self::new(RecurrenceKind::Weekly, interval)
    }

    pub fn monthly(interval: u32) -> Result<Self, CoreError> {
        Self::new(RecurrenceKind::Monthly, interval)
    }

    pub fn yearly(interval: u32) -> Result<Self, CoreError> {
        Self::new(RecurrenceKind::Yearly, interval)
    }

    pub fn weekly_on(interval: u32, days: Vec<DayOfWeek>) -> Result<Self, CoreError> {
        let mut rule = Self {
            kind: RecurrenceKind::WeeklyOnDays,
            interval,
            days_of_week: days,
            ordinal: None,
            weekday: None,
            end: EndCondition::Never,
        };
        rule.days_of_week.sort_by_key(|d| d.to_chrono().num_days_from_monday());
        rule.days_of_week.dedup();
        rule.validate()?;
        Ok(rule)
    }

    pub fn ordinal_weekday(
        interval: u32,
        ordinal: Ordinal,
        weekday: DayOfWeek,
    ) -> Result<Self, CoreError> {
        let rule = Self {
            kind: RecurrenceKind::OrdinalWeekdayOfMonth,
            interval,
            days_of_week: Vec::new(),
            ordinal: Some(ordinal),
            weekday: Some(weekday),
            end: EndCondition::Never,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn with_end(mut self, end: EndCondition) -> Result<Self, CoreError> {
        self.end = end;
        self.validate()?;
        Ok(self)
    }

    fn new(kind: RecurrenceKind, interval: u32) -> Result<Self, CoreError> {
        let rule = Self {
            kind,
            interval,
            days_of_week: Vec::new(),
            ordinal: None,
            weekday: None,
            end: EndCondition::Never,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Check the structural invariants of the rule.
    ///
    /// Stored rules are re-validated after deserialization, so malformed
    /// documents are caught before any occurrence computation runs on them.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval == 0 {
            return Err(CoreError::InvalidRule(
                "interval must be at least 1".to_string(),
            ));
        }
        match self.kind {
            RecurrenceKind::WeeklyOnDays => {
                if self.days_of_week.is_empty() {
                    return Err(CoreError::InvalidRule(
                        "weekly-on-days requires a non-empty day set".to_string(),
                    ));
                }
            }
            RecurrenceKind::OrdinalWeekdayOfMonth => {
                if self.ordinal.is_none() || self.weekday.is_none() {
                    return Err(CoreError::InvalidRule(
                        "ordinal-weekday-of-month requires an ordinal and a weekday".to_string(),
                    ));
                }
            }
            _ => {
                if !self.days_of_week.is_empty() {
                    return Err(CoreError::InvalidRule(format!(
                        "day set is only valid for weekly-on-days, not {:?}",
                        self.kind
                    )));
                }
            }
        }
        if let EndCondition::AfterCount { count } = self.end {
            if count == 0 {
                return Err(CoreError::InvalidRule(
                    "end-after-count must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Scheduled,
    Completed,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderStatus::Scheduled => write!(f, "scheduled"),
            ReminderStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid reminder status: {0}")]
pub struct ParseReminderStatusError(String);

impl FromStr for ReminderStatus {
    type Err = ParseReminderStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(ReminderStatus::Scheduled),
            "completed" => Ok(ReminderStatus::Completed),
            _ => Err(ParseReminderStatusError(s.to_string())),
        }
    }
}

/// Ordered set of lead-time offsets plus an on/off flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    pub enabled: bool,
    /// Minutes before the due instant, ascending, deduplicated.
    pub lead_times_minutes: Vec<i64>,
}

impl NotificationPolicy {
    pub fn new(mut lead_times_minutes: Vec<i64>) -> Self {
        lead_times_minutes.sort_unstable();
        lead_times_minutes.dedup();
        Self {
            enabled: true,
            lead_times_minutes,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            lead_times_minutes: Vec::new(),
        }
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            lead_times_minutes: Vec::new(),
        }
    }
}

/// One reminder record.
///
/// `due_date` is always expressed and compared in the reminder's own
/// `timezone`, never in device-local time. `anchor_date` is the date the
/// recurrence pattern is defined relative to; it is carried unchanged across
/// successor instances so the pattern never drifts.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: Uuid,
    pub owner_id: String,
    pub family_id: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    pub due_date: NaiveDate,
    pub due_time: Option<NaiveTime>,
    pub timezone: String,
    pub anchor_date: NaiveDate,
    pub recurrence: Option<RecurrenceRule>,
    /// Completed occurrences of this series so far, carried across
    /// successor instances; bounds `EndCondition::AfterCount`.
    pub completed_occurrences: u32,
    pub status: ReminderStatus,
    pub notification_policy: NotificationPolicy,
    /// Family-member ids the reminder is shared with; empty means private.
    pub assignment: Vec<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Reminder {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// The UTC instant this reminder is due, resolved in its own zone.
    /// All-day reminders anchor at [`ALL_DAY_FIRE_TIME`] local.
    pub fn due_instant(&self) -> Result<DateTime<Utc>, CoreError> {
        let time = self.due_time.unwrap_or(ALL_DAY_FIRE_TIME);
        timezone::local_instant(self.due_date, time, &self.timezone)
    }

    /// Whether the series has produced all the completed occurrences its
    /// end condition allows. One-shot reminders are always exhausted.
    pub fn recurrence_exhausted(&self) -> bool {
        match &self.recurrence {
            None => true,
            Some(rule) => match rule.end {
                EndCondition::AfterCount { count } => self.completed_occurrences >= count,
                _ => false,
            },
        }
    }

    /// Users whose reminder lists include this record: the owner plus every
    /// assigned family member.
    pub fn affected_users(&self) -> Vec<String> {
        let mut users = Vec::with_capacity(1 + self.assignment.len());
        users.push(self.owner_id.clone());
        for member in &self.assignment {
            if !users.contains(member) {
                users.push(member.clone());
            }
        }
        users
    }

    /// Apply a partial update in place. Bumping `version`/`updated_at` is the
    /// store's responsibility, not the patch's.
    pub fn apply_patch(&mut self, patch: &ReminderPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(due_time) = patch.due_time {
            self.due_time = due_time;
        }
        if let Some(timezone) = &patch.timezone {
            self.timezone = timezone.clone();
        }
        if let Some(recurrence) = &patch.recurrence {
            self.recurrence = recurrence.clone();
        }
        if let Some(policy) = &patch.notification_policy {
            self.notification_policy = policy.clone();
        }
        if let Some(assignment) = &patch.assignment {
            self.assignment = assignment.clone();
        }
        if let Some(family_id) = &patch.family_id {
            self.family_id = family_id.clone();
        }
        if let Some(status) = &patch.status {
            self.status = status.clone();
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(count) = patch.completed_occurrences {
            self.completed_occurrences = count;
        }
    }
}

/// Data required to create a new reminder (the `draft` state).
#[derive(Debug, Clone, Default)]
pub struct NewReminderData {
    pub owner_id: String,
    pub family_id: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    /// The date the schedule starts; for recurring reminders this is also
    /// the pattern anchor.
    pub start_date: NaiveDate,
    pub due_time: Option<NaiveTime>,
    pub timezone: String,
    pub recurrence: Option<RecurrenceRule>,
    pub notification_policy: NotificationPolicy,
    pub assignment: Vec<String>,
}

/// Partial update for a scheduled reminder.
///
/// Outer `None` leaves the field untouched; `Some(None)` on double-option
/// fields clears it.
#[derive(Debug, Clone, Default)]
pub struct ReminderPatch {
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<Option<NaiveTime>>,
    pub timezone: Option<String>,
    pub recurrence: Option<Option<RecurrenceRule>>,
    pub notification_policy: Option<NotificationPolicy>,
    pub assignment: Option<Vec<String>>,
    pub family_id: Option<Option<String>>,
    pub status: Option<ReminderStatus>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub completed_occurrences: Option<u32>,
}

impl ReminderPatch {
    /// Whether this patch changes anything that moves notification
    /// fire-times: lead-time offsets are computed relative to the due
    /// instant, so such edits require a full teardown-and-reschedule.
    pub fn touches_timing(&self) -> bool {
        self.due_date.is_some()
            || self.due_time.is_some()
            || self.timezone.is_some()
            || self.recurrence.is_some()
            || self.notification_policy.is_some()
    }
}

/// Outcome of completing a reminder.
#[derive(Debug)]
pub enum CompletionOutcome {
    OneShot(Reminder),
    Recurring {
        completed: Reminder,
        /// The materialized successor instance, or `None` when the end
        /// condition is exhausted.
        successor: Option<Reminder>,
    },
}

impl CompletionOutcome {
    pub fn completed(&self) -> &Reminder {
        match self {
            CompletionOutcome::OneShot(reminder) => reminder,
            CompletionOutcome::Recurring { completed, .. } => completed,
        }
    }

    pub fn successor(&self) -> Option<&Reminder> {
        match self {
            CompletionOutcome::OneShot(_) => None,
            CompletionOutcome::Recurring { successor, .. } => successor.as_ref(),
        }
    }
}

/// One page of a reminder list, as served by the store and the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderPage {
    pub items: Vec<Reminder>,
    pub has_more: bool,
    pub total_count: u32,
}
