use std::collections::BTreeMap;

use crate::models::{now_ms, Flashcard, Grade, RetentionState, StudyDirection};

const MIN_EASE_FACTOR: f64 = 1.3;
const EASE_BONUS: f64 = 0.15;
const EASE_PENALTY_HARD: f64 = 0.15;
const EASE_PENALTY_AGAIN: f64 = 0.2;

const MINUTES_PER_DAY: f64 = 24.0 * 60.0;
const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

// learning steps in minutes
const LEARNING_STEPS: [f64; 2] = [1.0, 10.0];

const GRADUATING_INTERVAL: f64 = 1.0;
const EASY_BONUS: f64 = 1.3;
const HARD_INTERVAL_MULTIPLIER: f64 = 1.2;

pub fn compute_next(state: &RetentionState, grade: Grade) -> RetentionState {
    compute_next_at(state, grade, now_ms())
}

/// Next retention state for `grade`, reviewed at `now` (epoch ms).
///
/// The phase is implied by the interval: below one day the card is still
/// learning, at or above it the card has graduated. `Again` lapses either
/// phase back to the first learning step.
pub fn compute_next_at(state: &RetentionState, grade: Grade, now: i64) -> RetentionState {
    let ease_factor = state.ease_factor.max(MIN_EASE_FACTOR);
    let interval = state.interval.max(0.0);

    let (next_interval, next_ease, next_repetitions) = match grade {
        Grade::Again => (
            LEARNING_STEPS[0] / MINUTES_PER_DAY,
            (ease_factor - EASE_PENALTY_AGAIN).max(MIN_EASE_FACTOR),
            0,
        ),
        _ if state.is_learning() => match grade {
            Grade::Hard => (LEARNING_STEPS[1] / MINUTES_PER_DAY, ease_factor, state.repetitions),
            Grade::Good => (GRADUATING_INTERVAL, ease_factor, 1),
            _ => (GRADUATING_INTERVAL * EASY_BONUS, ease_factor + EASE_BONUS, 1),
        },
        Grade::Hard => (
            interval * HARD_INTERVAL_MULTIPLIER,
            (ease_factor - EASE_PENALTY_HARD).max(MIN_EASE_FACTOR),
            state.repetitions + 1,
        ),
        Grade::Good => (interval * ease_factor, ease_factor, state.repetitions + 1),
        Grade::Easy => (
            interval * ease_factor * EASY_BONUS,
            ease_factor + EASE_BONUS,
            state.repetitions + 1,
        ),
    };

    RetentionState {
        last_reviewed: Some(now),
        interval: next_interval,
        ease_factor: next_ease,
        repetitions: next_repetitions,
        due_date: Some(due_after(now, next_interval)),
    }
}

/// Epoch ms `interval_days` after `now`, pinned to `i64::MAX` for intervals
/// past the representable range.
fn due_after(now: i64, interval_days: f64) -> i64 {
    // float-to-int `as` saturates, so only the add can overflow
    let offset = (interval_days * MS_PER_DAY).round() as i64;
    now.saturating_add(offset)
}

pub fn is_due(card: &Flashcard, direction: StudyDirection, now: i64) -> bool {
    match card.retention(direction).and_then(|s| s.due_date) {
        Some(due) => due <= now,
        None => true,
    }
}

pub fn is_due_any_direction(card: &Flashcard, now: i64) -> bool {
    StudyDirection::BOTH.iter().any(|dir| is_due(card, *dir, now))
}

/// Due cards ordered most-overdue first. Never-reviewed cards sort as if
/// due right now, so they interleave with fresh overdue cards.
pub fn due_cards(cards: &[Flashcard], direction: StudyDirection, now: i64) -> Vec<Flashcard> {
    let mut due: Vec<Flashcard> = cards
        .iter()
        .filter(|card| is_due(card, direction, now))
        .cloned()
        .collect();

    due.sort_by_key(|card| {
        card.retention(direction)
            .and_then(|s| s.due_date)
            .unwrap_or(now)
    });
    due
}

pub fn new_cards(cards: &[Flashcard], direction: StudyDirection) -> Vec<Flashcard> {
    cards
        .iter()
        .filter(|card| card.retention(direction).map_or(true, RetentionState::is_new))
        .cloned()
        .collect()
}

pub fn learning_cards(cards: &[Flashcard], direction: StudyDirection) -> Vec<Flashcard> {
    cards
        .iter()
        .filter(|card| {
            card.retention(direction)
                .map_or(false, |s| !s.is_new() && s.is_learning())
        })
        .cloned()
        .collect()
}

pub fn format_interval(days: f64) -> String {
    if days < 1.0 / 24.0 {
        format!("{}m", (days * MINUTES_PER_DAY).round() as i64)
    } else if days < 1.0 {
        format!("{}h", (days * 24.0).round() as i64)
    } else if days < 30.0 {
        format!("{}d", days.round() as i64)
    } else if days < 365.0 {
        format!("{}mo", (days / 30.0).round() as i64)
    } else {
        let years = (days / 365.0 * 10.0).round() / 10.0;
        format!("{years}y")
    }
}

/// What each grade would schedule, formatted for display.
pub fn predicted_intervals(card: &Flashcard, direction: StudyDirection) -> BTreeMap<Grade, String> {
    let state = card.retention_or_default(direction);
    let now = now_ms();
    Grade::ALL
        .iter()
        .map(|grade| (*grade, format_interval(compute_next_at(&state, *grade, now).interval)))
        .collect()
}
