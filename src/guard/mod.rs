//! Keyword and pattern based screening of user requests and model answers.
//!
//! This is advisory filtering: it misses things and it blocks harmless
//! text now and then. There is no escalation, only accept or reject.

use log::info;
use once_cell::sync::Lazy;
use regex::{ Regex, RegexBuilder };
use serde::{ Deserialize, Serialize };
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const VALID_REASON: &str = "Valid";
pub const DEFAULT_OUTPUT_REFUSAL: &str = "I cannot provide that information for security reasons.";

static DEFAULT_CONFIG: Lazy<GuardConfig> = Lazy::new(|| GuardConfig {
    blocked_keywords: [
        "how to hack",
        "how to steal",
        "how to cheat",
        "how to scam",
        "illegal way",
        "break the law",
        "avoid taxes illegally",
        "money laundering",
        "drug dealing",
        "weapon",
        "violence",
    ]
        .into_iter()
        .map(String::from)
        .collect(),
    injection_patterns: [
        r"ignore.*instruction",
        r"forget.*you.*are",
        r"system.*prompt",
        r"previous.*instruction",
        r"act.*as.*if",
    ]
        .into_iter()
        .map(String::from)
        .collect(),
    blocked_output_phrases: ["system prompt is", "my instructions are", "I can help you hack"]
        .into_iter()
        .map(String::from)
        .collect(),
    output_refusal: DEFAULT_OUTPUT_REFUSAL.to_string(),
});

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Invalid injection pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid guard configuration: {0}")]
    Config(String),
    #[error("Guard config file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Guard config JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The fixed word lists a [`SecurityGuard`] is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub blocked_keywords: Vec<String>,
    pub injection_patterns: Vec<String>,
    pub blocked_output_phrases: Vec<String>,
    #[serde(default = "default_output_refusal")]
    pub output_refusal: String,
}

fn default_output_refusal() -> String {
    DEFAULT_OUTPUT_REFUSAL.to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        DEFAULT_CONFIG.clone()
    }
}

impl GuardConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GuardError> {
        let path = path.as_ref();
        info!("Loading guard configuration from {}", path.display());
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub reason: String,
}

impl ValidationResult {
    fn valid() -> Self {
        Self { is_valid: true, reason: VALID_REASON.to_string() }
    }

    fn blocked(reason: String) -> Self {
        Self { is_valid: false, reason }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityGuard {
    blocked_keywords: Vec<String>,
    injection_patterns: Vec<Regex>,
    blocked_output_phrases: Vec<String>,
    output_refusal: String,
}

impl Default for SecurityGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default()).expect("built-in guard configuration is valid")
    }
}

impl SecurityGuard {
    /// Fails on a pattern that does not compile, or when the configured
    /// refusal would itself be caught by the output filter.
    pub fn new(config: GuardConfig) -> Result<Self, GuardError> {
        let injection_patterns = config.injection_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| GuardError::Pattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let guard = Self {
            blocked_keywords: lowercase_non_empty(config.blocked_keywords),
            injection_patterns,
            blocked_output_phrases: lowercase_non_empty(config.blocked_output_phrases),
            output_refusal: config.output_refusal,
        };

        if guard.output_refusal.trim().is_empty() {
            return Err(GuardError::Config("output refusal must not be empty".to_string()));
        }
        if let Some(phrase) = guard.blocked_output_phrase(&guard.output_refusal) {
            return Err(
                GuardError::Config(
                    format!("output refusal contains blocked phrase '{}'", phrase)
                )
            );
        }

        Ok(guard)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GuardError> {
        Self::new(GuardConfig::load(path)?)
    }

    /// Keyword checks run before pattern checks; the first hit wins.
    pub fn validate(&self, text: &str) -> ValidationResult {
        let lowered = text.to_lowercase();

        if
            let Some(keyword) = self.blocked_keywords
                .iter()
                .find(|keyword| lowered.contains(keyword.as_str()))
        {
            return ValidationResult::blocked(
                format!("Query blocked: contains disallowed topic '{}'", keyword)
            );
        }

        if self.injection_patterns.iter().any(|pattern| pattern.is_match(&lowered)) {
            return ValidationResult::blocked(
                "Query blocked: potential prompt injection".to_string()
            );
        }

        ValidationResult::valid()
    }

    /// Replaces the whole answer with the refusal if any blocked phrase
    /// appears in it.
    pub fn filter_output(&self, text: &str) -> String {
        match self.blocked_output_phrase(text) {
            Some(_) => self.output_refusal.clone(),
            None => text.to_string(),
        }
    }

    /// True when [`SecurityGuard::filter_output`] would replace `text`.
    pub fn blocks_output(&self, text: &str) -> bool {
        self.blocked_output_phrase(text).is_some()
    }

    pub fn output_refusal(&self) -> &str {
        &self.output_refusal
    }

    fn blocked_output_phrase(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.blocked_output_phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

fn lowercase_non_empty(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
