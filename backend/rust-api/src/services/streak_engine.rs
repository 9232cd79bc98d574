//! Pure streak transition logic.
//!
//! Everything here works on values already fetched by `StreakService`; no I/O
//! happens in this module, which keeps every policy decision unit-testable.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{
    streak::{PRACTICE_DAYS_RETAINED, WEEKLY_STATS_CAP},
    ActivityRecord, DaySummary, LifetimeCounters, StreakRecord, WeekSummary, WeekdayStat,
};
use crate::utils::calendar::{
    day_key, parse_day_key, week_end, week_start, weekday_name, CivilCalendar,
};

/// Inputs gathered for one credited day.
#[derive(Debug, Clone)]
pub struct DailyActivity<'a> {
    pub today: NaiveDate,
    /// Sessions completed during `today`.
    pub todays_sessions: &'a [ActivityRecord],
    /// Most recent sessions across all days, newest first.
    pub recent_sessions: &'a [ActivityRecord],
    pub lifetime: LifetimeCounters,
}

/// True when `today` is on or before the last credited day. Such a day was
/// either already credited or lies behind the streak, and leaves the record
/// untouched.
pub fn is_already_credited(last_practice: Option<NaiveDate>, today: NaiveDate) -> bool {
    last_practice.is_some_and(|last| last >= today)
}

/// Streak value after crediting `today`, given the previous state.
pub fn next_streak(current: u32, last_practice: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_practice {
        Some(last) if last >= today => current,
        Some(last) if last == today - Duration::days(1) => current.saturating_add(1),
        Some(_) => 1,
        None => 1,
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Aggregates the sessions of one civil day. Minutes are floored per session
/// before summing.
pub fn summarize_day(sessions: &[ActivityRecord]) -> DaySummary {
    let questions: u64 = sessions.iter().map(|s| u64::from(s.question_count)).sum();
    let correct: u64 = sessions.iter().map(|s| u64::from(s.correct_count)).sum();
    let minutes: u64 = sessions.iter().map(ActivityRecord::time_spent_minutes).sum();

    DaySummary {
        quiz_count: saturate(sessions.len() as u64),
        question_count: saturate(questions),
        correct_count: saturate(correct),
        accuracy: ratio(correct, questions),
        time_spent_minutes: saturate(minutes),
    }
}

/// Drops day entries older than six days before the newest key (today, or a
/// later key already present).
pub fn retain_recent_days(practice_days: &mut BTreeMap<String, DaySummary>, today: NaiveDate) {
    let newest = practice_days
        .keys()
        .filter_map(|key| parse_day_key(key))
        .max()
        .map_or(today, |newest| newest.max(today));
    let cutoff = newest - Duration::days(PRACTICE_DAYS_RETAINED - 1);

    practice_days.retain(|key, _| parse_day_key(key).is_some_and(|date| date >= cutoff));
}

/// Accuracy over the sessions whose civil completion day falls on `weekday`.
pub fn weekday_accuracy(
    sessions: &[ActivityRecord],
    weekday: &str,
    calendar: &CivilCalendar,
) -> Option<f64> {
    let (correct, questions) = sessions
        .iter()
        .filter(|s| calendar.weekday_of(s.completed_at) == weekday)
        .fold((0u64, 0u64), |(correct, questions), s| {
            (
                correct + u64::from(s.correct_count),
                questions + u64::from(s.question_count),
            )
        });

    ratio(correct, questions)
}

/// Summary of the Monday–Sunday week containing `today`, built from the
/// retained day entries. Days already evicted from `practice_days` are not
/// counted.
pub fn summarize_week(practice_days: &BTreeMap<String, DaySummary>, today: NaiveDate) -> WeekSummary {
    let start = week_start(today);
    let end = week_end(today);

    let mut days = 0u64;
    let mut quizzes = 0u64;
    let mut questions = 0u64;
    let mut correct = 0u64;
    let mut minutes = 0u64;

    for (key, day) in practice_days {
        let Some(date) = parse_day_key(key) else {
            continue;
        };
        if date < start || date > end {
            continue;
        }
        days += 1;
        quizzes += u64::from(day.quiz_count);
        questions += u64::from(day.question_count);
        correct += u64::from(day.correct_count);
        minutes += u64::from(day.time_spent_minutes);
    }

    WeekSummary {
        week_end: end,
        days_practiced: saturate(days),
        total_quizzes: saturate(quizzes),
        total_questions: saturate(questions),
        total_correct: saturate(correct),
        avg_accuracy: ratio(correct, questions),
        total_time_minutes: saturate(minutes),
    }
}

/// Replaces the entry with the same `week_end` or inserts it in order, then
/// evicts the oldest entries beyond the cap.
pub fn upsert_week(weekly_stats: &mut Vec<WeekSummary>, summary: WeekSummary) {
    match weekly_stats.binary_search_by(|w| w.week_end.cmp(&summary.week_end)) {
        Ok(index) => weekly_stats[index] = summary,
        Err(index) => weekly_stats.insert(index, summary),
    }

    if weekly_stats.len() > WEEKLY_STATS_CAP {
        let overflow = weekly_stats.len() - WEEKLY_STATS_CAP;
        weekly_stats.drain(..overflow);
    }
}

/// Credits `activity.today` on top of `previous` and returns the new record.
/// The caller is responsible for skipping days already credited.
pub fn apply_activity(
    previous: &StreakRecord,
    activity: &DailyActivity<'_>,
    calendar: &CivilCalendar,
) -> StreakRecord {
    let today = activity.today;
    let mut next = previous.clone();

    next.current_streak = next_streak(previous.current_streak, previous.last_practice_date, today);
    next.longest_streak = previous.longest_streak.max(next.current_streak);

    next.practice_days
        .insert(day_key(today), summarize_day(activity.todays_sessions));
    retain_recent_days(&mut next.practice_days, today);

    let weekday = weekday_name(today.weekday());
    next.day_of_week_pattern.insert(
        weekday.to_string(),
        WeekdayStat {
            practiced: true,
            avg_accuracy: weekday_accuracy(activity.recent_sessions, weekday, calendar),
        },
    );

    next.total_quizzes_completed = activity.lifetime.quizzes_completed;
    next.total_questions_answered = activity.lifetime.questions_answered;
    next.total_time_spent_minutes = activity.lifetime.time_spent_minutes;

    upsert_week(&mut next.weekly_stats, summarize_week(&next.practice_days, today));

    if !is_already_credited(previous.last_practice_date, today) {
        next.total_days_practiced = previous.total_days_practiced.saturating_add(1);
    }
    next.last_practice_date = previous.last_practice_date.max(Some(today));

    next
}
