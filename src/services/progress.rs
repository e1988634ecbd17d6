use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;

use crate::models::{Flashcard, StudyDirection, VocabList};
use crate::services::srs::is_due_any_direction;
use crate::services::stats::{current_streak, date_key, day_of, weekly_stats, DailyStatsMap};

const MATURE_INTERVAL_DAYS: f64 = 21.0;
const FORECAST_DAYS: i64 = 7;
const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDue {
    pub list_id: String,
    pub list_name: String,
    pub due_count: usize,
    pub total_cards: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LearningOverview {
    pub new: usize,
    pub learning: usize,
    pub mature: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMetrics {
    pub total_due: usize,
    pub due_by_list: Vec<ListDue>,
    pub weekly_reviews: u32,
    pub weekly_accuracy: Option<u32>,
    pub current_streak: u32,
    pub learning_overview: LearningOverview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDay {
    pub date: String,
    pub day_name: String,
    pub count: usize,
    pub is_today: bool,
    pub is_overdue: bool,
}

pub fn compute_progress(lists: &[VocabList], stats: &DailyStatsMap, now: i64) -> ProgressMetrics {
    let today = day_of(now);
    let week = weekly_stats(stats, today);
    let weekly_reviews: u32 = week.iter().map(|d| d.reviews).sum();
    let weekly_correct: u32 = week.iter().map(|d| d.correct).sum();
    let weekly_accuracy = (weekly_reviews > 0)
        .then(|| (f64::from(weekly_correct) / f64::from(weekly_reviews) * 100.0).round() as u32);

    let due_by_list: Vec<ListDue> = lists
        .iter()
        .map(|list| ListDue {
            list_id: list.id.clone(),
            list_name: list.name.clone(),
            due_count: list
                .flashcards
                .iter()
                .filter(|card| is_due_any_direction(card, now))
                .count(),
            total_cards: list.flashcards.len(),
        })
        .collect();

    ProgressMetrics {
        total_due: due_by_list.iter().map(|l| l.due_count).sum(),
        due_by_list,
        weekly_reviews,
        weekly_accuracy,
        current_streak: current_streak(stats, today),
        learning_overview: learning_overview(lists.iter().flat_map(|l| l.flashcards.iter())),
    }
}

pub fn learning_overview<'a>(cards: impl Iterator<Item = &'a Flashcard>) -> LearningOverview {
    let mut overview = LearningOverview::default();
    for card in cards {
        let reviewed = StudyDirection::BOTH
            .iter()
            .any(|dir| card.retention(*dir).map_or(false, |s| !s.is_new()));
        let max_interval = StudyDirection::BOTH
            .iter()
            .filter_map(|dir| card.retention(*dir).map(|s| s.interval))
            .fold(0.0_f64, f64::max);

        if max_interval >= MATURE_INTERVAL_DAYS {
            overview.mature += 1;
        } else if reviewed {
            overview.learning += 1;
        } else {
            overview.new += 1;
        }
    }
    overview
}

fn earliest_due(card: &Flashcard) -> Option<i64> {
    StudyDirection::BOTH
        .iter()
        .filter_map(|dir| card.retention(*dir).and_then(|s| s.due_date))
        .min()
}

fn day_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Cards coming due over the next week, bucketed by UTC day of their
/// earliest due date. An overdue bucket leads when anything is due before
/// today; never-reviewed cards count toward today.
pub fn due_forecast(lists: &[VocabList], now: i64) -> Vec<ForecastDay> {
    let today = day_of(now);
    let today_start = now - now.rem_euclid(MS_PER_DAY);
    let cards: Vec<&Flashcard> = lists.iter().flat_map(|l| l.flashcards.iter()).collect();

    let mut days = Vec::with_capacity(FORECAST_DAYS as usize + 1);

    let overdue = cards
        .iter()
        .filter(|card| earliest_due(card).map_or(false, |due| due < today_start))
        .count();
    if overdue > 0 {
        days.push(ForecastDay {
            date: "overdue".to_string(),
            day_name: "Overdue".to_string(),
            count: overdue,
            is_today: false,
            is_overdue: true,
        });
    }

    for offset in 0..FORECAST_DAYS {
        let day_start = today_start + offset * MS_PER_DAY;
        let day_end = day_start + MS_PER_DAY;
        let date = today + Duration::days(offset);

        let count = cards
            .iter()
            .filter(|card| match earliest_due(card) {
                None => offset == 0,
                Some(due) => due >= day_start && due < day_end,
            })
            .count();

        days.push(ForecastDay {
            date: date_key(date),
            day_name: if offset == 0 { "Today".to_string() } else { day_name(date).to_string() },
            count,
            is_today: offset == 0,
            is_overdue: false,
        });
    }

    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewFlashcard, RetentionState};
    use crate::services::stats::record_review;

    // 2024-03-10T12:00:00Z, a Sunday
    const NOW: i64 = 1_710_072_000_000;

    fn card(interval: Option<f64>, due: Option<i64>) -> Flashcard {
        let mut card = NewFlashcard::new("a", "b").into_flashcard();
        if let Some(interval) = interval {
            card.set_retention(
                StudyDirection::Normal,
                RetentionState {
                    last_reviewed: Some(NOW - MS_PER_DAY),
                    interval,
                    due_date: due,
                    ..Default::default()
                },
            );
        }
        card
    }

    fn list_with(cards: Vec<Flashcard>) -> VocabList {
        let mut list = VocabList::new("Mixed", vec![], NOW);
        list.flashcards = cards;
        list
    }

    #[test]
    fn test_learning_overview_buckets() {
        let list = list_with(vec![
            card(None, None),
            card(Some(3.0), Some(NOW + MS_PER_DAY)),
            card(Some(30.0), Some(NOW + 30 * MS_PER_DAY)),
        ]);
        let overview = learning_overview(list.flashcards.iter());
        assert_eq!(overview, LearningOverview { new: 1, learning: 1, mature: 1 });
    }

    #[test]
    fn test_compute_progress_counts_due_and_accuracy() {
        let lists = vec![list_with(vec![
            card(None, None),
            card(Some(2.0), Some(NOW - 1_000)),
            card(Some(2.0), Some(NOW + MS_PER_DAY)),
        ])];
        let mut stats = DailyStatsMap::new();
        let today = day_of(NOW);
        record_review(&mut stats, today, &lists[0].id, true);
        record_review(&mut stats, today, &lists[0].id, true);
        record_review(&mut stats, today, &lists[0].id, false);

        let metrics = compute_progress(&lists, &stats, NOW);
        // the third card is still due in the reverse direction
        assert_eq!(metrics.total_due, 3);
        assert_eq!(metrics.due_by_list[0].total_cards, 3);
        assert_eq!(metrics.weekly_reviews, 3);
        assert_eq!(metrics.weekly_accuracy, Some(67));
        assert_eq!(metrics.current_streak, 1);
    }

    #[test]
    fn test_accuracy_absent_without_reviews() {
        let metrics = compute_progress(&[], &DailyStatsMap::new(), NOW);
        assert_eq!(metrics.weekly_accuracy, None);
        assert_eq!(metrics.total_due, 0);
    }

    #[test]
    fn test_forecast_buckets() {
        let lists = vec![list_with(vec![
            card(None, None),
            card(Some(2.0), Some(NOW - 3 * MS_PER_DAY)),
            card(Some(2.0), Some(NOW + 2 * MS_PER_DAY)),
        ])];

        let forecast = due_forecast(&lists, NOW);
        assert_eq!(forecast.len(), 8);
        assert!(forecast[0].is_overdue);
        assert_eq!(forecast[0].count, 1);
        assert!(forecast[1].is_today);
        assert_eq!(forecast[1].day_name, "Today");
        assert_eq!(forecast[1].count, 1);
        assert_eq!(forecast[3].date, "2024-03-12");
        assert_eq!(forecast[3].day_name, "Tue");
        assert_eq!(forecast[3].count, 1);
    }
}
