use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::models::{DailyStats, ListStats};

const STREAK_LOOKBACK_DAYS: i64 = 365;
const WEEK_DAYS: i64 = 7;

pub type DailyStatsMap = BTreeMap<String, DailyStats>;

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn day_of(timestamp_ms: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .date_naive()
}

/// Adds one review to `date`'s counters, overall and for `list_id`.
pub fn record_review(stats: &mut DailyStatsMap, date: NaiveDate, list_id: &str, is_correct: bool) -> DailyStats {
    let key = date_key(date);
    let day = stats
        .entry(key.clone())
        .or_insert_with(|| DailyStats::empty(key));

    let hit = u32::from(is_correct);
    day.reviews = day.reviews.saturating_add(1);
    day.correct = day.correct.saturating_add(hit);

    let per_list = day.by_list.entry(list_id.to_string()).or_insert_with(ListStats::default);
    per_list.reviews = per_list.reviews.saturating_add(1);
    per_list.correct = per_list.correct.saturating_add(hit);

    day.clone()
}

/// The seven days ending at `today`, oldest first, with gaps filled in.
pub fn weekly_stats(stats: &DailyStatsMap, today: NaiveDate) -> Vec<DailyStats> {
    (0..WEEK_DAYS)
        .rev()
        .map(|offset| {
            let key = date_key(today - Duration::days(offset));
            stats.get(&key).cloned().unwrap_or_else(|| DailyStats::empty(key))
        })
        .collect()
}

/// Consecutive days with at least one review. Today may still be empty
/// without breaking the streak.
pub fn current_streak(stats: &DailyStatsMap, today: NaiveDate) -> u32 {
    let mut streak = 0u32;
    for offset in 0..STREAK_LOOKBACK_DAYS {
        let key = date_key(today - Duration::days(offset));
        match stats.get(&key) {
            Some(day) if day.reviews > 0 => streak += 1,
            _ if offset == 0 => continue,
            _ => break,
        }
    }
    streak
}
