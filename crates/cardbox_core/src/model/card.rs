//! Card domain model.
//!
//! # Responsibility
//! - Define the canonical card record held by the store cache.
//! - Provide the metadata-only projection used by list/filter paths.
//!
//! # Invariants
//! - `id` is stable and never reused for another card.
//! - `links` is derived from `content`, except for explicit reference
//!   management (`add_reference` / `remove_reference`).
//! - `tags` and `links` never contain duplicates.

use crate::model::document::Document;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stable identifier of a card.
///
/// Ids are backend-assigned strings (UUID v4 for cards created here, but
/// externally created cards may use other shapes such as daily-note dates).
pub type CardId = String;

/// Fixed set of card categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    /// Quick capture, not yet processed.
    #[default]
    Fleeting,
    /// Notes taken from a source (book, article).
    Literature,
    /// Processed, self-contained idea.
    Permanent,
    /// Container that references other cards.
    Project,
}

impl CardType {
    /// Wire/database name of the type tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fleeting => "fleeting",
            Self::Literature => "literature",
            Self::Permanent => "permanent",
            Self::Project => "project",
        }
    }

    /// Parses a wire name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fleeting" => Some(Self::Fleeting),
            "literature" => Some(Self::Literature),
            "permanent" => Some(Self::Permanent),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

impl Display for CardType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failure for card input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardValidationError {
    /// Title is empty after trimming.
    BlankTitle,
    /// Id is empty or could escape the vault directory.
    InvalidId(String),
}

impl Display for CardValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "card title cannot be blank"),
            Self::InvalidId(id) => write!(f, "invalid card id: `{id}`"),
        }
    }
}

impl Error for CardValidationError {}

/// Checks a title supplied for a new card.
pub fn validate_title(title: &str) -> Result<(), CardValidationError> {
    if title.trim().is_empty() {
        return Err(CardValidationError::BlankTitle);
    }
    Ok(())
}

/// Checks an id before it is handed to the backend.
///
/// File-backed backends use vault-relative paths such as `permanent/idea.md`
/// as ids. Nested folders are fine; `..` segments and absolute paths are not.
pub fn validate_card_id(id: &str) -> Result<(), CardValidationError> {
    let escapes = id.starts_with(['/', '\\'])
        || id.split(['/', '\\']).any(|segment| segment == "..");
    if id.trim().is_empty() || escapes {
        return Err(CardValidationError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Full card record, content included.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: CardId,
    pub card_type: CardType,
    pub title: String,
    pub content: Document,
    pub tags: Vec<String>,
    pub links: Vec<CardId>,
    pub source_id: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

impl Card {
    /// Metadata-only projection of this card.
    pub fn summary(&self) -> CardSummary {
        CardSummary {
            id: self.id.clone(),
            card_type: self.card_type,
            title: self.title.clone(),
            tags: self.tags.clone(),
            links: self.links.clone(),
            source_id: self.source_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Returns whether this card's outbound links contain `target`.
    pub fn links_to(&self, target: &str) -> bool {
        self.links.iter().any(|id| id == target)
    }
}

/// Card metadata without content.
///
/// Returned by `list`/`filtered`/`backlinks_of` to keep the working set light.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: CardId,
    #[serde(rename = "type")]
    pub card_type: CardType,
    pub title: String,
    pub tags: Vec<String>,
    pub links: Vec<CardId>,
    pub source_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CardSummary {
    pub fn links_to(&self, target: &str) -> bool {
        self.links.iter().any(|id| id == target)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|value| value == tag)
    }
}

/// Trims tags, drops blanks and duplicates, keeps first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() || normalized.iter().any(|seen| seen == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

/// Drops empty and duplicate ids, keeps first-seen order.
pub fn dedupe_links(links: &[CardId]) -> Vec<CardId> {
    let mut unique: Vec<CardId> = Vec::with_capacity(links.len());
    for id in links {
        if id.is_empty() || unique.contains(id) {
            continue;
        }
        unique.push(id.clone());
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::{dedupe_links, normalize_tags, validate_card_id, validate_title, CardType};

    #[test]
    fn card_type_parses_case_insensitively() {
        assert_eq!(CardType::parse("Permanent"), Some(CardType::Permanent));
        assert_eq!(CardType::parse(" project "), Some(CardType::Project));
        assert_eq!(CardType::parse("canvas"), None);
    }

    #[test]
    fn normalize_tags_keeps_first_occurrence_order() {
        let tags = vec![
            "rust".to_string(),
            " ideas ".to_string(),
            "".to_string(),
            "rust".to_string(),
        ];
        assert_eq!(
            normalize_tags(&tags),
            vec!["rust".to_string(), "ideas".to_string()]
        );
    }

    #[test]
    fn dedupe_links_drops_empty_and_repeated_ids() {
        let links = vec!["a".to_string(), String::new(), "b".to_string(), "a".to_string()];
        assert_eq!(dedupe_links(&links), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn validation_rejects_blank_titles_and_traversal_ids() {
        assert!(validate_title("   ").is_err());
        assert!(validate_title("Alpha").is_ok());
        assert!(validate_card_id("../etc").is_err());
        assert!(validate_card_id("notes/../../etc").is_err());
        assert!(validate_card_id("/etc/passwd").is_err());
        assert!(validate_card_id("permanent/idea.md").is_ok());
        assert!(validate_card_id("inbox\\draft..v2.md").is_ok());
        assert!(validate_card_id("2024-05-01").is_ok());
    }
}
