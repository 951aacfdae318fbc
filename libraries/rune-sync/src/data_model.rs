//! Records shared between the store, the queue and the resolver.
//!
//! [`MasteryRecord`] is owned by the remote authority; everything the client keeps locally is a
//! derivative of it ([`crate::store::LocalStore`]'s review cache) or a staging record waiting to be
//! applied to it ([`PendingOutcome`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How well a learner commands a rune.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum MasteryLevel {
    #[default]
    Unknown = 0,
    Discovered = 1,
    Learning = 2,
    Mastered = 3,
    Engraved = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown mastery level {0}")]
pub struct InvalidMasteryLevel(pub u8);

impl MasteryLevel {
    pub fn label(self) -> &'static str {
        match self {
            MasteryLevel::Unknown => "unknown",
            MasteryLevel::Discovered => "discovered",
            MasteryLevel::Learning => "learning",
            MasteryLevel::Mastered => "mastered",
            MasteryLevel::Engraved => "engraved",
        }
    }
}

impl TryFrom<u8> for MasteryLevel {
    type Error = InvalidMasteryLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MasteryLevel::Unknown),
            1 => Ok(MasteryLevel::Discovered),
            2 => Ok(MasteryLevel::Learning),
            3 => Ok(MasteryLevel::Mastered),
            4 => Ok(MasteryLevel::Engraved),
            other => Err(InvalidMasteryLevel(other)),
        }
    }
}

impl From<MasteryLevel> for u8 {
    fn from(level: MasteryLevel) -> Self {
        level as u8
    }
}

impl std::fmt::Display for MasteryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A learner's command of one rune, as last reported by the remote authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub item_id: String,
    #[serde(default)]
    pub mastery_level: MasteryLevel,
    #[serde(default)]
    pub successful_casts: u32,
    #[serde(default)]
    pub failed_casts: u32,
    #[serde(default)]
    pub next_review_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_word: Option<String>,
}

impl MasteryRecord {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            mastery_level: MasteryLevel::Unknown,
            successful_casts: 0,
            failed_casts: 0,
            next_review_date: None,
            display_word: None,
        }
    }

    pub fn with_next_review_date(mut self, next_review_date: DateTime<Utc>) -> Self {
        self.next_review_date = Some(next_review_date);
        self
    }

    /// A record is due once its review date has arrived. Records that were never scheduled are
    /// never due, whatever their mastery level.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.next_review_date.is_some_and(|date| date <= now)
    }
}

/// A review answer that has been written to the local queue but not yet acknowledged by the
/// remote authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOutcome {
    pub id: i64,
    pub user_id: String,
    pub item_id: String,
    pub is_correct: bool,
    pub timestamp: DateTime<Utc>,
}

/// The payload of a [`PendingOutcome`] before the store has assigned it an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOutcome {
    pub user_id: String,
    pub item_id: String,
    pub is_correct: bool,
    pub timestamp: DateTime<Utc>,
}

impl NewOutcome {
    pub fn now(user_id: impl Into<String>, item_id: impl Into<String>, is_correct: bool) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            is_correct,
            timestamp: Utc::now(),
        }
    }
}
