use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub type DeckId = Uuid;
pub type BoxId = i64;
pub type CardId = i64;
pub type TagId = i64;
pub type StatisticId = i64;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    Classic,
    Media,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Classic => "classic",
            QuestionType::Media => "media",
        }
    }
}

impl FromStr for QuestionType {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classic" => Ok(QuestionType::Classic),
            "media" => Ok(QuestionType::Media),
            _ => Err(crate::CoreError::Invalid("question type")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "e" | "easy" => Ok(Difficulty::Easy),
            "m" | "med" | "medium" => Ok(Difficulty::Medium),
            "h" | "hard" => Ok(Difficulty::Hard),
            _ => Err(crate::CoreError::Invalid("difficulty")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deck {
    pub id: DeckId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Deck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A Leitner box: cards in it come up for review every `interval_days`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeitnerBox {
    pub id: BoxId,
    pub name: String,
    pub interval_days: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub deck_id: DeckId,
    pub box_id: BoxId,
    pub question_type: QuestionType,
    pub question: Option<String>,
    pub answer: String,
    pub notes: Option<String>,
    pub media: Option<String>,
    pub last_answered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Card fields supplied by the caller; ids and timestamps come from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCard {
    pub deck_id: DeckId,
    pub box_id: BoxId,
    pub question_type: QuestionType,
    pub question: Option<String>,
    pub answer: String,
    pub notes: Option<String>,
    pub media: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub deck_id: DeckId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TagRef {
    pub id: TagId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTag {
    pub deck_id: DeckId,
    pub name: String,
}

/// Pivot row linking a card to one of its deck's tags.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CardTag {
    pub card_id: CardId,
    pub tag_id: TagId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistic {
    pub id: StatisticId,
    pub card_id: CardId,
    pub box_id: BoxId,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
}
