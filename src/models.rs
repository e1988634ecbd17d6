use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ========== Scheduling ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyDirection {
    Normal,
    Reverse,
}

impl StudyDirection {
    pub const BOTH: [StudyDirection; 2] = [StudyDirection::Normal, StudyDirection::Reverse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Reverse => "reverse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::Again, Grade::Hard, Grade::Good, Grade::Easy];

    /// Counts toward the daily "correct" tally.
    pub fn is_correct(&self) -> bool {
        matches!(self, Self::Good | Self::Easy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }
}

fn default_ease_factor() -> f64 {
    DEFAULT_EASE_FACTOR
}

/// Spaced-repetition bookkeeping for one card in one direction.
///
/// `due_date` is derived from `last_reviewed + interval` whenever the
/// scheduler writes the state; nothing else should set it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed: Option<i64>,
    #[serde(default)]
    pub interval: f64,
    #[serde(default = "default_ease_factor")]
    pub ease_factor: f64,
    #[serde(default)]
    pub repetitions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
}

impl Default for RetentionState {
    fn default() -> Self {
        Self {
            last_reviewed: None,
            interval: 0.0,
            ease_factor: DEFAULT_EASE_FACTOR,
            repetitions: 0,
            due_date: None,
        }
    }
}

impl RetentionState {
    pub fn is_learning(&self) -> bool {
        self.interval < 1.0
    }

    pub fn is_new(&self) -> bool {
        self.last_reviewed.is_none()
    }
}

// ========== Collection ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srs_normal: Option<RetentionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srs_reverse: Option<RetentionState>,
}

impl Flashcard {
    pub fn retention(&self, direction: StudyDirection) -> Option<&RetentionState> {
        match direction {
            StudyDirection::Normal => self.srs_normal.as_ref(),
            StudyDirection::Reverse => self.srs_reverse.as_ref(),
        }
    }

    pub fn retention_or_default(&self, direction: StudyDirection) -> RetentionState {
        self.retention(direction).cloned().unwrap_or_default()
    }

    pub fn set_retention(&mut self, direction: StudyDirection, state: RetentionState) {
        match direction {
            StudyDirection::Normal => self.srs_normal = Some(state),
            StudyDirection::Reverse => self.srs_reverse = Some(state),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Flashcard content before an id is assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlashcard {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewFlashcard {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn into_flashcard(self) -> Flashcard {
        Flashcard {
            id: generate_id(),
            source: self.source,
            target: self.target,
            gender: self.gender,
            part_of_speech: self.part_of_speech,
            example: self.example,
            notes: self.notes,
            tags: self.tags,
            srs_normal: None,
            srs_reverse: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlashcardPatch {
    pub source: Option<String>,
    pub target: Option<String>,
    pub gender: Option<Option<String>>,
    pub part_of_speech: Option<Option<String>>,
    pub example: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

impl FlashcardPatch {
    pub fn apply_to(self, card: &mut Flashcard) {
        if let Some(source) = self.source {
            card.source = source;
        }
        if let Some(target) = self.target {
            card.target = target;
        }
        if let Some(gender) = self.gender {
            card.gender = gender;
        }
        if let Some(part_of_speech) = self.part_of_speech {
            card.part_of_speech = part_of_speech;
        }
        if let Some(example) = self.example {
            card.example = example;
        }
        if let Some(notes) = self.notes {
            card.notes = notes;
        }
        if let Some(tags) = self.tags {
            card.tags = tags;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabList {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
}

impl VocabList {
    pub fn new(name: impl Into<String>, tags: Vec<String>, now: i64) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            created_at: now,
            last_modified: Some(now),
            tags,
            flashcards: Vec::new(),
        }
    }

    /// Merge vector; older records without `lastModified` fall back to `createdAt`.
    pub fn merge_timestamp(&self) -> i64 {
        self.last_modified.unwrap_or(self.created_at)
    }

    pub fn touch(&mut self, now: i64) {
        self.last_modified = Some(now);
    }

    pub fn flashcard(&self, id: &str) -> Option<&Flashcard> {
        self.flashcards.iter().find(|card| card.id == id)
    }

    pub fn flashcard_mut(&mut self, id: &str) -> Option<&mut Flashcard> {
        self.flashcards.iter_mut().find(|card| card.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPatch {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
}

// ========== Settings ==========

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_key: String,
    pub source_lang: String,
    pub target_lang: String,
    pub keep_images: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            source_lang: "en".to_string(),
            target_lang: "es".to_string(),
            keep_images: false,
        }
    }
}

impl Settings {
    /// Copy safe to hand to the remote replica.
    pub fn without_secret(&self) -> Self {
        Self {
            api_key: String::new(),
            ..self.clone()
        }
    }

    pub fn with_secret_from(self, local: &Settings) -> Self {
        Self {
            api_key: local.api_key.clone(),
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub api_key: Option<String>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub keep_images: Option<bool>,
}

impl SettingsPatch {
    pub fn apply_to(self, settings: &mut Settings) {
        if let Some(api_key) = self.api_key {
            settings.api_key = api_key;
        }
        if let Some(source_lang) = self.source_lang {
            settings.source_lang = source_lang;
        }
        if let Some(target_lang) = self.target_lang {
            settings.target_lang = target_lang;
        }
        if let Some(keep_images) = self.keep_images {
            settings.keep_images = keep_images;
        }
    }
}

// ========== Statistics ==========

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListStats {
    pub reviews: u32,
    pub correct: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: String,
    #[serde(default)]
    pub reviews: u32,
    #[serde(default)]
    pub correct: u32,
    #[serde(default)]
    pub by_list: BTreeMap<String, ListStats>,
}

impl DailyStats {
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            reviews: 0,
            correct: 0,
            by_list: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_defaults_fill_missing_fields() {
        let state: RetentionState = serde_json::from_str(r#"{"interval": 3.5}"#).unwrap();
        assert_eq!(state.interval, 3.5);
        assert_eq!(state.ease_factor, DEFAULT_EASE_FACTOR);
        assert_eq!(state.repetitions, 0);
        assert!(state.due_date.is_none());
    }

    #[test]
    fn test_list_without_last_modified_falls_back_to_created_at() {
        let list: VocabList =
            serde_json::from_str(r#"{"id":"a","name":"Verbs","createdAt":42,"tags":[],"flashcards":[]}"#)
                .unwrap();
        assert_eq!(list.merge_timestamp(), 42);
    }

    #[test]
    fn test_list_uses_camel_case_on_the_wire() {
        let mut list = VocabList::new("Food", vec!["a1".into()], 1_000);
        list.flashcards.push(NewFlashcard::new("apple", "manzana").into_flashcard());
        let value = serde_json::to_value(&list).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("lastModified").is_some());
        assert!(value["flashcards"][0].get("srsNormal").is_none());
    }

    #[test]
    fn test_settings_secret_helpers() {
        let local = Settings {
            api_key: "abc".into(),
            ..Settings::default()
        };
        let remote = Settings {
            target_lang: "fr".into(),
            ..local.without_secret()
        };
        assert_eq!(remote.api_key, "");

        let merged = remote.with_secret_from(&local);
        assert_eq!(merged.api_key, "abc");
        assert_eq!(merged.target_lang, "fr");
    }

    #[test]
    fn test_grade_correctness() {
        assert!(!Grade::Again.is_correct());
        assert!(!Grade::Hard.is_correct());
        assert!(Grade::Good.is_correct());
        assert!(Grade::Easy.is_correct());
    }
}
