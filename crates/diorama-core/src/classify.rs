//! Compiler error classification.
//!
//! The compiler only reports free-form messages, so categories are derived by keyword matching
//! on the lowercased text. Rules are checked in order and the first match wins. Message wording
//! changes between compiler versions; [`ErrorCategory::Unknown`] is the floor, not a bug.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compiler::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Syntax,
    Format,
    Structure,
    UnexpectedContent,
    MissingSymbols,
    InvalidCharacter,
    UnclosedBrackets,
    Unknown,
}

impl ErrorCategory {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Syntax => "Invalid diagram syntax",
            Self::Format => "Diagram format error",
            Self::Structure => "Invalid diagram structure",
            Self::UnexpectedContent => "Unexpected diagram content",
            Self::MissingSymbols => "Invalid diagram syntax - missing or incorrect symbols",
            Self::InvalidCharacter => "Invalid character usage in diagram",
            Self::UnclosedBrackets => "Missing closing brackets or incomplete syntax",
            Self::Unknown => "Unable to render diagram",
        }
    }
}

enum Keywords {
    Any(&'static [&'static str]),
    All(&'static [&'static str]),
}

impl Keywords {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            Keywords::Any(words) => words.iter().any(|w| haystack.contains(w)),
            Keywords::All(words) => words.iter().all(|w| haystack.contains(w)),
        }
    }
}

const RULES: &[(Keywords, ErrorCategory)] = &[
    (Keywords::Any(&["syntax"]), ErrorCategory::Syntax),
    (Keywords::Any(&["parse"]), ErrorCategory::Format),
    (Keywords::Any(&["lexical"]), ErrorCategory::Structure),
    (Keywords::Any(&["unexpected"]), ErrorCategory::UnexpectedContent),
    (
        Keywords::All(&["expecting", "got"]),
        ErrorCategory::MissingSymbols,
    ),
    (Keywords::Any(&["pipe"]), ErrorCategory::InvalidCharacter),
    (
        Keywords::Any(&["diamond_stop", "tagend"]),
        ErrorCategory::UnclosedBrackets,
    ),
];

pub fn classify(raw_message: &str) -> ErrorCategory {
    let lowered = raw_message.to_lowercase();
    RULES
        .iter()
        .find(|(keywords, _)| keywords.matches(&lowered))
        .map(|(_, category)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// User-facing description of a failed render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub user_message: String,
    pub technical_message: String,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
}

impl ErrorInfo {
    pub fn from_raw(raw_message: &str, timestamp: DateTime<Utc>) -> Self {
        let category = classify(raw_message);
        Self {
            user_message: category.user_message().to_string(),
            technical_message: raw_message.to_string(),
            timestamp,
            category,
        }
    }

    pub fn from_compile_error(err: &CompileError, timestamp: DateTime<Utc>) -> Self {
        Self::from_raw(err.message(), timestamp)
    }
}
