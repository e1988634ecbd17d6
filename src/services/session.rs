use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

use crate::models::{now_ms, DailyStats, Flashcard, Grade, RetentionState, StudyDirection};
use crate::services::srs;
use crate::services::stats::day_of;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("flashcard not found: {0}")]
    CardNotFound(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub list_id: String,
    pub flashcard: Flashcard,
    pub direction: StudyDirection,
    pub grade: Grade,
    pub previous: RetentionState,
    pub next: RetentionState,
    pub daily: DailyStats,
}

/// Drives reviews against the shared collection.
#[derive(Clone)]
pub struct SessionController {
    state: AppState,
}

impl SessionController {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Cards of one list (or all lists), optionally narrowed to cards
    /// carrying any of `tag_filters`.
    pub fn cards(&self, list_id: Option<&str>, tag_filters: &[String]) -> Vec<Flashcard> {
        let lists = self.state.lists();
        lists
            .iter()
            .filter(|list| list_id.map_or(true, |id| list.id == id))
            .flat_map(|list| list.flashcards.iter())
            .filter(|card| tag_filters.is_empty() || tag_filters.iter().any(|tag| card.has_tag(tag)))
            .cloned()
            .collect()
    }

    pub fn due_queue(&self, list_id: Option<&str>, direction: StudyDirection, now: i64) -> Vec<Flashcard> {
        srs::due_cards(&self.cards(list_id, &[]), direction, now)
    }

    pub async fn review(
        &self,
        flashcard_id: &str,
        grade: Grade,
        direction: StudyDirection,
    ) -> Result<ReviewOutcome, ReviewError> {
        self.review_at(flashcard_id, grade, direction, now_ms()).await
    }

    pub async fn review_at(
        &self,
        flashcard_id: &str,
        grade: Grade,
        direction: StudyDirection,
        now: i64,
    ) -> Result<ReviewOutcome, ReviewError> {
        let (list_id, previous) = {
            let lists = self.state.lists();
            lists
                .iter()
                .find_map(|list| {
                    list.flashcard(flashcard_id)
                        .map(|card| (list.id.clone(), card.retention_or_default(direction)))
                })
                .ok_or_else(|| ReviewError::CardNotFound(flashcard_id.to_string()))?
        };

        let next = srs::compute_next_at(&previous, grade, now);
        let flashcard = self
            .state
            .apply_review(&list_id, flashcard_id, direction, next.clone(), now)
            .await
            .ok_or_else(|| ReviewError::CardNotFound(flashcard_id.to_string()))?;

        let daily = self
            .state
            .record_review(&list_id, grade.is_correct(), day_of(now))
            .await;

        debug!(
            flashcard_id = %flashcard_id,
            list_id = %list_id,
            grade = grade.as_str(),
            direction = direction.as_str(),
            interval = next.interval,
            "review recorded"
        );

        Ok(ReviewOutcome {
            list_id,
            flashcard,
            direction,
            grade,
            previous,
            next,
            daily,
        })
    }
}

/// A pass over a fixed set of cards.
#[derive(Debug, Clone)]
pub struct StudySession {
    pub direction: StudyDirection,
    pub list_id: Option<String>,
    pub tag_filters: Vec<String>,
    cards: Vec<Flashcard>,
    current_index: usize,
    known_count: u32,
    unknown_count: u32,
    flipped: bool,
    completed: bool,
    started_at: i64,
}

impl StudySession {
    /// `None` when there is nothing to study.
    pub fn start(
        cards: Vec<Flashcard>,
        direction: StudyDirection,
        list_id: Option<String>,
        tag_filters: Vec<String>,
    ) -> Option<Self> {
        if cards.is_empty() {
            return None;
        }
        Some(Self {
            direction,
            list_id,
            tag_filters,
            cards,
            current_index: 0,
            known_count: 0,
            unknown_count: 0,
            flipped: false,
            completed: false,
            started_at: now_ms(),
        })
    }

    pub fn current(&self) -> Option<&Flashcard> {
        if self.completed {
            return None;
        }
        self.cards.get(self.current_index)
    }

    pub fn cards(&self) -> &[Flashcard] {
        &self.cards
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn known_count(&self) -> u32 {
        self.known_count
    }

    pub fn unknown_count(&self) -> u32 {
        self.unknown_count
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn flip(&mut self) {
        self.flipped = !self.flipped;
    }

    /// Advances; stepping past the last card completes the session.
    pub fn next(&mut self) {
        if self.completed {
            return;
        }
        self.flipped = false;
        if self.current_index + 1 >= self.cards.len() {
            self.completed = true;
        } else {
            self.current_index += 1;
        }
    }

    pub fn previous(&mut self) {
        if self.current_index > 0 {
            self.current_index -= 1;
            self.flipped = false;
            self.completed = false;
        }
    }

    pub fn mark_known(&mut self) {
        if self.completed {
            return;
        }
        self.known_count += 1;
        self.next();
    }

    pub fn mark_unknown(&mut self) {
        if self.completed {
            return;
        }
        self.unknown_count += 1;
        self.next();
    }

    /// Reshuffles and restarts from the first card.
    pub fn shuffle(&mut self) {
        self.cards.shuffle(&mut rand::rng());
        self.current_index = 0;
        self.flipped = false;
        self.completed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChangeBus;
    use crate::models::NewFlashcard;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const NOW: i64 = 1_710_072_000_000;

    fn cards(n: usize) -> Vec<Flashcard> {
        (0..n)
            .map(|i| NewFlashcard::new(format!("s{i}"), format!("t{i}")).into_flashcard())
            .collect()
    }

    async fn controller_with_card() -> (SessionController, AppState, String, String) {
        let state = AppState::new(Arc::new(MemoryStore::local()), ChangeBus::default());
        let list = state.create_list("Verbs", vec![]).await;
        let mut card = NewFlashcard::new("ir", "to go");
        card.tags = vec!["motion".into()];
        let card = state.add_flashcard(&list.id, card).await.unwrap();
        (SessionController::new(state.clone()), state, list.id, card.id)
    }

    #[test]
    fn test_start_empty_returns_none() {
        assert!(StudySession::start(Vec::new(), StudyDirection::Normal, None, vec![]).is_none());
    }

    #[test]
    fn test_session_navigation_and_counts() {
        let mut session = StudySession::start(cards(3), StudyDirection::Normal, None, vec![]).unwrap();

        session.flip();
        assert!(session.is_flipped());
        session.mark_known();
        assert!(!session.is_flipped());
        assert_eq!(session.current_index(), 1);

        session.previous();
        assert_eq!(session.current_index(), 0);

        session.mark_unknown();
        session.mark_known();
        session.mark_known();
        assert!(session.is_completed());
        assert!(session.current().is_none());
        assert_eq!(session.known_count(), 3);
        assert_eq!(session.unknown_count(), 1);

        session.mark_known();
        assert_eq!(session.known_count(), 3);
    }

    #[test]
    fn test_shuffle_keeps_cards_and_restarts() {
        let original = cards(10);
        let mut session = StudySession::start(original.clone(), StudyDirection::Reverse, None, vec![]).unwrap();
        session.next();
        session.shuffle();

        assert_eq!(session.current_index(), 0);
        let mut ids: Vec<_> = session.cards().iter().map(|c| c.id.clone()).collect();
        let mut expected: Vec<_> = original.into_iter().map(|c| c.id).collect();
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_review_updates_card_and_stats() {
        let (controller, state, list_id, card_id) = controller_with_card().await;

        let outcome = controller
            .review_at(&card_id, Grade::Good, StudyDirection::Normal, NOW)
            .await
            .unwrap();

        assert_eq!(outcome.list_id, list_id);
        assert_eq!(outcome.next.interval, 1.0);
        assert_eq!(outcome.daily.reviews, 1);
        assert_eq!(outcome.daily.correct, 1);
        assert_eq!(outcome.daily.by_list[&list_id].reviews, 1);

        let stored = state.list(&list_id).unwrap();
        assert_eq!(stored.last_modified, Some(NOW));
        assert_eq!(stored.flashcards[0].srs_normal.as_ref().unwrap().due_date, Some(NOW + 86_400_000));
        assert!(stored.flashcards[0].srs_reverse.is_none());
    }

    #[tokio::test]
    async fn test_incorrect_review_counts_review_only() {
        let (controller, _state, _list_id, card_id) = controller_with_card().await;
        let outcome = controller
            .review_at(&card_id, Grade::Hard, StudyDirection::Reverse, NOW)
            .await
            .unwrap();
        assert_eq!(outcome.daily.reviews, 1);
        assert_eq!(outcome.daily.correct, 0);
    }

    #[tokio::test]
    async fn test_review_unknown_card() {
        let (controller, ..) = controller_with_card().await;
        let err = controller
            .review_at("missing", Grade::Good, StudyDirection::Normal, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::CardNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_card_selection_by_tag() {
        let (controller, state, list_id, _card_id) = controller_with_card().await;
        state
            .add_flashcard(&list_id, NewFlashcard::new("comer", "to eat"))
            .await
            .unwrap();

        assert_eq!(controller.cards(Some(&list_id), &[]).len(), 2);
        assert_eq!(controller.cards(None, &["motion".to_string()]).len(), 1);
        assert!(controller.cards(Some("other"), &[]).is_empty());
        assert_eq!(controller.due_queue(None, StudyDirection::Normal, NOW).len(), 2);
    }
}
