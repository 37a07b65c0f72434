//! Occurrence generation for the bounded recurrence pattern set.
//!
//! All functions here are pure calendar math: occurrences are `NaiveDate`s
//! in the reminder's own timezone, never instants, so results cannot drift
//! across DST transitions. The generator is stateless; `AfterCount` end
//! conditions are tracked by the lifecycle controller on the reminder
//! record, not here.

use crate::error::CoreError;
use crate::models::{DayOfWeek, EndCondition, Ordinal, RecurrenceKind, RecurrenceRule};
use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Returns the smallest valid occurrence date strictly after `from`
/// (defaulting to the anchor), or `None` once the end condition is reached.
///
/// The anchor itself is the first occurrence of every pattern: calling with
/// `from = anchor - 1 day` yields the anchor when it fits the pattern, which
/// is how creation resolves "first occurrence on/after the start date".
pub fn next_occurrence(
    rule: &RecurrenceRule,
    anchor: NaiveDate,
    from: Option<NaiveDate>,
) -> Result<Option<NaiveDate>, CoreError> {
    rule.validate()?;
    let from = from.unwrap_or(anchor);

    let candidate = match rule.kind {
        RecurrenceKind::Daily => next_stepped(anchor, rule.interval as i64, from),
        RecurrenceKind::Weekly => next_stepped(anchor, rule.interval as i64 * 7, from),
        RecurrenceKind::WeeklyOnDays => {
            next_weekly_on_days(anchor, rule.interval, &rule.days_of_week, from)
        }
        RecurrenceKind::Monthly => next_monthly(anchor, rule.interval, from),
        RecurrenceKind::Yearly => next_yearly(anchor, rule.interval, from),
        RecurrenceKind::OrdinalWeekdayOfMonth => {
            // Validated above, so both fields are present.
            let ordinal = rule.ordinal.ok_or_else(|| {
                CoreError::InvalidRule("ordinal-weekday-of-month missing ordinal".to_string())
            })?;
            let weekday = rule.weekday.ok_or_else(|| {
                CoreError::InvalidRule("ordinal-weekday-of-month missing weekday".to_string())
            })?;
            next_ordinal_weekday(anchor, rule.interval, ordinal, weekday.to_chrono(), from)
        }
    };

    match (rule.end, candidate) {
        (EndCondition::OnDate { date }, Some(c)) if c > date => Ok(None),
        (_, c) => Ok(c),
    }
}

/// Accumulates up to `max_count` occurrences starting at the anchor,
/// optionally bounded by `until`. Preview and testing only; production
/// scheduling materializes one occurrence at a time to avoid unbounded
/// future writes.
pub fn generate_occurrences(
    rule: &RecurrenceRule,
    anchor: NaiveDate,
    max_count: usize,
    until: Option<NaiveDate>,
) -> Result<Vec<NaiveDate>, CoreError> {
    rule.validate()?;

    let budget = match rule.end {
        EndCondition::AfterCount { count } => max_count.min(count as usize),
        _ => max_count,
    };

    let mut occurrences = Vec::with_capacity(budget.min(64));
    // Step back one day so the anchor itself is eligible.
    let mut from = anchor - Duration::days(1);
    while occurrences.len() < budget {
        match next_occurrence(rule, anchor, Some(from))? {
            Some(date) => {
                if let Some(until) = until {
                    if date > until {
                        break;
                    }
                }
                occurrences.push(date);
                from = date;
            }
            None => break,
        }
    }
    Ok(occurrences)
}

/// Fixed-step patterns (daily, plain weekly): `anchor + n * step_days` for
/// the smallest `n >= 0` strictly after `from`.
fn next_stepped(anchor: NaiveDate, step_days: i64, from: NaiveDate) -> Option<NaiveDate> {
    if from < anchor {
        return Some(anchor);
    }
    let elapsed = (from - anchor).num_days();
    let n = elapsed / step_days + 1;
    anchor.checked_add_signed(Duration::days(n * step_days))
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Scan forward day-by-day selecting dates whose weekday is in the set,
/// restricted to weeks aligned with the anchor's week by `interval`
/// (e.g. "every other week on Mon/Wed").
fn next_weekly_on_days(
    anchor: NaiveDate,
    interval: u32,
    days: &[DayOfWeek],
    from: NaiveDate,
) -> Option<NaiveDate> {
    let anchor_week = week_start(anchor);
    // Occurrences never precede the anchor.
    let mut date = from.max(anchor - Duration::days(1));

    // The widest gap between consecutive occurrences is interval weeks plus
    // the in-week spread, so this bound is never reached by a valid rule.
    for _ in 0..7 * (interval as i64 + 2) {
        date = date.succ_opt()?;
        let weeks_from_anchor = (week_start(date) - anchor_week).num_days() / 7;
        if weeks_from_anchor % interval as i64 != 0 {
            continue;
        }
        if days.iter().any(|d| d.to_chrono() == date.weekday()) {
            return Some(date);
        }
    }
    None
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// (year, month) advanced by `months`, month kept in 1..=12.
fn shift_month(year: i32, month: u32, months: i64) -> (i32, u32) {
    let total = year as i64 * 12 + (month as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = total.rem_euclid(12) as u32 + 1;
    (year, month)
}

/// Same day-of-month as the anchor every `interval` months, clamped to the
/// target month's last day (Jan 31 -> Feb 28/29).
fn next_monthly(anchor: NaiveDate, interval: u32, from: NaiveDate) -> Option<NaiveDate> {
    let target_day = anchor.day();
    // Rough starting multiple; stepping up from one multiple early keeps the
    // loop short without risking an off-by-one overshoot.
    let months_elapsed =
        (from.year() as i64 - anchor.year() as i64) * 12 + from.month() as i64 - anchor.month() as i64;
    let mut n = (months_elapsed / interval as i64 - 1).max(0);

    loop {
        let (year, month) = shift_month(anchor.year(), anchor.month(), n * interval as i64);
        let day = target_day.min(days_in_month(year, month));
        let candidate = NaiveDate::from_ymd_opt(year, month, day)?;
        if candidate > from {
            return Some(candidate);
        }
        n += 1;
    }
}

/// Same month/day every `interval` years; Feb 29 anchors clamp to Feb 28 in
/// non-leap years.
fn next_yearly(anchor: NaiveDate, interval: u32, from: NaiveDate) -> Option<NaiveDate> {
    let years_elapsed = from.year() as i64 - anchor.year() as i64;
    let mut n = (years_elapsed / interval as i64 - 1).max(0);

    loop {
        let year = anchor.year() + (n * interval as i64) as i32;
        let day = anchor.day().min(days_in_month(year, anchor.month()));
        let candidate = NaiveDate::from_ymd_opt(year, anchor.month(), day)?;
        if candidate > from {
            return Some(candidate);
        }
        n += 1;
    }
}

/// The {first|second|third|fourth|last} `weekday` of the month, which exists
/// in every month.
fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, ordinal: Ordinal) -> Option<NaiveDate> {
    match ordinal {
        Ordinal::Last => {
            let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
            let back = (last.weekday().num_days_from_monday() + 7
                - weekday.num_days_from_monday())
                % 7;
            last.checked_sub_signed(Duration::days(back as i64))
        }
        _ => {
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            let forward = (weekday.num_days_from_monday() + 7
                - first.weekday().num_days_from_monday())
                % 7;
            let index = match ordinal {
                Ordinal::First => 0,
                Ordinal::Second => 1,
                Ordinal::Third => 2,
                Ordinal::Fourth => 3,
                Ordinal::Last => unreachable!(),
            };
            first.checked_add_signed(Duration::days(forward as i64 + 7 * index))
        }
    }
}

/// Compute the ordinal weekday within months aligned to the anchor month by
/// `interval`, advancing month-by-month until one lands after `from`.
fn next_ordinal_weekday(
    anchor: NaiveDate,
    interval: u32,
    ordinal: Ordinal,
    weekday: Weekday,
    from: NaiveDate,
) -> Option<NaiveDate> {
    let months_elapsed =
        (from.year() as i64 - anchor.year() as i64) * 12 + from.month() as i64 - anchor.month() as i64;
    let mut n = (months_elapsed / interval as i64 - 1).max(0);

    loop {
        let (year, month) = shift_month(anchor.year(), anchor.month(), n * interval as i64);
        let candidate = nth_weekday_of_month(year, month, weekday, ordinal)?;
        if candidate > from {
            return Some(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    mod daily_and_weekly {
        use super::*;

        #[test]
        fn test_daily_steps_by_interval() {
            let rule = RecurrenceRule::daily(3).unwrap();
            let anchor = date(2024, 1, 15);

            let next = next_occurrence(&rule, anchor, None).unwrap();
            assert_eq!(next, Some(date(2024, 1, 18)));

            // From a date between occurrences, snap to the next multiple.
            let next = next_occurrence(&rule, anchor, Some(date(2024, 1, 19))).unwrap();
            assert_eq!(next, Some(date(2024, 1, 21)));
        }

        #[test]
        fn test_anchor_is_first_occurrence() {
            let rule = RecurrenceRule::daily(1).unwrap();
            let anchor = date(2024, 1, 15);

            let next = next_occurrence(&rule, anchor, Some(anchor - Duration::days(1))).unwrap();
            assert_eq!(next, Some(anchor));
        }

        #[test]
        fn test_weekly_is_seven_day_step() {
            let rule = RecurrenceRule::weekly(2).unwrap();
            let anchor = date(2024, 1, 15);

            let next = next_occurrence(&rule, anchor, None).unwrap();
            assert_eq!(next, Some(date(2024, 1, 29)));
        }

        proptest! {
            /// For a daily rule with interval k, n applications from the
            /// anchor land exactly on anchor + n*k days.
            #[test]
            fn prop_daily_applications_accumulate(interval in 1u32..30, steps in 1usize..50) {
                let rule = RecurrenceRule::daily(interval).unwrap();
                let anchor = date(2024, 1, 1);

                let mut current = anchor;
                for _ in 0..steps {
                    current = next_occurrence(&rule, anchor, Some(current)).unwrap().unwrap();
                }
                prop_assert_eq!(
                    current,
                    anchor + Duration::days(interval as i64 * steps as i64)
                );
            }
        }
    }

    mod weekly_on_days {
        use super::*;

        #[test]
        fn test_mon_wed_fri_sequence() {
            let rule = RecurrenceRule::weekly_on(
                1,
                vec![DayOfWeek::Mon, DayOfWeek::Wed, DayOfWeek::Fri],
            )
            .unwrap();
            let anchor = date(2024, 1, 15); // a Monday

            let occurrences = generate_occurrences(&rule, anchor, 5, None).unwrap();
            assert_eq!(
                occurrences,
                vec![
                    date(2024, 1, 15),
                    date(2024, 1, 17),
                    date(2024, 1, 19),
                    date(2024, 1, 22),
                    date(2024, 1, 24),
                ]
            );
        }

        #[test]
        fn test_every_other_week_skips_off_weeks() {
            let rule =
                RecurrenceRule::weekly_on(2, vec![DayOfWeek::Mon, DayOfWeek::Wed]).unwrap();
            let anchor = date(2024, 1, 15); // a Monday

            let occurrences = generate_occurrences(&rule, anchor, 4, None).unwrap();
            assert_eq!(
                occurrences,
                vec![
                    date(2024, 1, 15),
                    date(2024, 1, 17),
                    // week of Jan 22 is an off week
                    date(2024, 1, 29),
                    date(2024, 1, 31),
                ]
            );
        }

        #[test]
        fn test_anchor_mid_week_picks_later_day_in_same_week() {
            // Anchor on a Wednesday with Mon/Fri in the set: Monday of the
            // anchor week is in the past relative to the anchor, so the
            // first occurrence is that week's Friday.
            let rule =
                RecurrenceRule::weekly_on(1, vec![DayOfWeek::Mon, DayOfWeek::Fri]).unwrap();
            let anchor = date(2024, 1, 17); // a Wednesday

            let occurrences = generate_occurrences(&rule, anchor, 3, None).unwrap();
            assert_eq!(
                occurrences,
                vec![date(2024, 1, 19), date(2024, 1, 22), date(2024, 1, 26)]
            );
        }
    }

    mod monthly_and_yearly {
        use super::*;

        #[rstest]
        #[case(date(2024, 1, 31), date(2024, 2, 29))] // leap February
        #[case(date(2023, 1, 31), date(2023, 2, 28))]
        #[case(date(2024, 3, 31), date(2024, 4, 30))]
        fn test_monthly_clamps_to_last_valid_day(
            #[case] anchor: NaiveDate,
            #[case] expected: NaiveDate,
        ) {
            let rule = RecurrenceRule::monthly(1).unwrap();
            let next = next_occurrence(&rule, anchor, None).unwrap();
            assert_eq!(next, Some(expected));
        }

        #[test]
        fn test_monthly_day_31_always_lands_on_month_end() {
            let rule = RecurrenceRule::monthly(1).unwrap();
            let anchor = date(2024, 1, 31);

            let occurrences = generate_occurrences(&rule, anchor, 12, None).unwrap();
            for occurrence in &occurrences {
                let last = days_in_month(occurrence.year(), occurrence.month());
                assert!(
                    occurrence.day() == 31 || occurrence.day() == last,
                    "{} is neither day 31 nor the last day of its month",
                    occurrence
                );
            }
        }

        #[test]
        fn test_monthly_interval_three() {
            let rule = RecurrenceRule::monthly(3).unwrap();
            let anchor = date(2024, 1, 10);

            let occurrences = generate_occurrences(&rule, anchor, 4, None).unwrap();
            assert_eq!(
                occurrences,
                vec![
                    date(2024, 1, 10),
                    date(2024, 4, 10),
                    date(2024, 7, 10),
                    date(2024, 10, 10),
                ]
            );
        }

        #[test]
        fn test_yearly_feb_29_clamps_in_non_leap_years() {
            let rule = RecurrenceRule::yearly(1).unwrap();
            let anchor = date(2024, 2, 29);

            let occurrences = generate_occurrences(&rule, anchor, 5, None).unwrap();
            assert_eq!(
                occurrences,
                vec![
                    date(2024, 2, 29),
                    date(2025, 2, 28),
                    date(2026, 2, 28),
                    date(2027, 2, 28),
                    date(2028, 2, 29),
                ]
            );
        }
    }

    mod ordinal_weekday {
        use super::*;

        #[test]
        fn test_first_monday_of_next_month() {
            let rule =
                RecurrenceRule::ordinal_weekday(1, Ordinal::First, DayOfWeek::Mon).unwrap();
            let anchor = date(2024, 1, 15);

            let next = next_occurrence(&rule, anchor, None).unwrap();
            assert_eq!(next, Some(date(2024, 2, 5)));
        }

        #[test]
        fn test_first_monday_before_anchor_in_anchor_month_is_skipped() {
            // First Monday of Jan 2024 is Jan 1, before the anchor; the
            // generator must not step backwards.
            let rule =
                RecurrenceRule::ordinal_weekday(1, Ordinal::First, DayOfWeek::Mon).unwrap();
            let anchor = date(2024, 1, 15);

            let occurrences = generate_occurrences(&rule, anchor, 2, None).unwrap();
            assert_eq!(occurrences, vec![date(2024, 2, 5), date(2024, 3, 4)]);
        }

        #[rstest]
        #[case(Ordinal::First, date(2024, 2, 2))]
        #[case(Ordinal::Second, date(2024, 2, 9))]
        #[case(Ordinal::Third, date(2024, 2, 16))]
        #[case(Ordinal::Fourth, date(2024, 2, 23))]
        #[case(Ordinal::Last, date(2024, 2, 23))]
        fn test_ordinals_of_friday_february_2024(
            #[case] ordinal: Ordinal,
            #[case] expected: NaiveDate,
        ) {
            let found =
                nth_weekday_of_month(2024, 2, Weekday::Fri, ordinal).unwrap();
            assert_eq!(found, expected);
        }

        #[test]
        fn test_last_friday_sequence() {
            let rule =
                RecurrenceRule::ordinal_weekday(1, Ordinal::Last, DayOfWeek::Fri).unwrap();
            let anchor = date(2024, 1, 26); // last Friday of January

            let occurrences = generate_occurrences(&rule, anchor, 3, None).unwrap();
            assert_eq!(
                occurrences,
                vec![date(2024, 1, 26), date(2024, 2, 23), date(2024, 3, 29)]
            );
        }

        #[test]
        fn test_interval_applies_to_months() {
            let rule =
                RecurrenceRule::ordinal_weekday(2, Ordinal::First, DayOfWeek::Mon).unwrap();
            let anchor = date(2024, 1, 1); // first Monday of January

            let occurrences = generate_occurrences(&rule, anchor, 3, None).unwrap();
            assert_eq!(
                occurrences,
                vec![date(2024, 1, 1), date(2024, 3, 4), date(2024, 5, 6)]
            );
        }
    }

    mod end_conditions {
        use super::*;

        #[test]
        fn test_on_date_stops_generation() {
            let rule = RecurrenceRule::daily(10)
                .unwrap()
                .with_end(EndCondition::OnDate {
                    date: date(2024, 1, 20),
                })
                .unwrap();
            let anchor = date(2024, 1, 15);

            // Next would be Jan 25, past the end date.
            let next = next_occurrence(&rule, anchor, None).unwrap();
            assert_eq!(next, None);
        }

        #[test]
        fn test_on_date_allows_occurrence_on_the_boundary() {
            let rule = RecurrenceRule::daily(5)
                .unwrap()
                .with_end(EndCondition::OnDate {
                    date: date(2024, 1, 20),
                })
                .unwrap();
            let anchor = date(2024, 1, 15);

            let next = next_occurrence(&rule, anchor, None).unwrap();
            assert_eq!(next, Some(date(2024, 1, 20)));
        }

        #[test]
        fn test_after_count_caps_preview() {
            let rule = RecurrenceRule::daily(1)
                .unwrap()
                .with_end(EndCondition::AfterCount { count: 3 })
                .unwrap();
            let anchor = date(2024, 1, 15);

            let occurrences = generate_occurrences(&rule, anchor, 10, None).unwrap();
            assert_eq!(occurrences.len(), 3);
        }

        #[test]
        fn test_until_bounds_preview() {
            let rule = RecurrenceRule::daily(1).unwrap();
            let anchor = date(2024, 1, 15);

            let occurrences =
                generate_occurrences(&rule, anchor, 100, Some(date(2024, 1, 18))).unwrap();
            assert_eq!(
                occurrences,
                vec![
                    date(2024, 1, 15),
                    date(2024, 1, 16),
                    date(2024, 1, 17),
                    date(2024, 1, 18),
                ]
            );
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn test_generator_rejects_malformed_rule() {
            // Bypass the constructors to simulate a malformed stored rule.
            let rule = RecurrenceRule {
                kind: RecurrenceKind::WeeklyOnDays,
                interval: 1,
                days_of_week: vec![],
                ordinal: None,
                weekday: None,
                end: EndCondition::Never,
            };
            let result = next_occurrence(&rule, date(2024, 1, 15), None);
            assert!(matches!(result.unwrap_err(), CoreError::InvalidRule(_)));
        }

        #[test]
        fn test_generator_rejects_zero_interval() {
            let rule = RecurrenceRule {
                kind: RecurrenceKind::Daily,
                interval: 0,
                days_of_week: vec![],
                ordinal: None,
                weekday: None,
                end: EndCondition::Never,
            };
            let result = next_occurrence(&rule, date(2024, 1, 15), None);
            assert!(matches!(result.unwrap_err(), CoreError::InvalidRule(_)));
        }
    }
}
