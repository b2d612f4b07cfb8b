//! Message personalization with a closed placeholder set.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

/// Substituted when the recipient has no usable name.
pub const NAME_FALLBACK: &str = "there";

const FIRST_NAME: &str = "first_name";
const FULL_NAME: &str = "full_name";
/// Alias of `full_name`
const NAME: &str = "name";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("Invalid placeholder pattern"));

/// A validated message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    text: String,
}

impl MessageTemplate {
    /// Rejects empty text and any `{...}` token outside the supported set.
    pub fn parse(text: &str) -> AppResult<Self> {
        if text.trim().is_empty() {
            return Err(AppError::validation("message", "Message cannot be empty"));
        }

        let unknown: BTreeSet<&str> = PLACEHOLDER
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|token| token.as_str())
            .filter(|token| !matches!(*token, FIRST_NAME | FULL_NAME | NAME))
            .collect();

        if !unknown.is_empty() {
            let listed = unknown
                .iter()
                .map(|token| format!("{{{}}}", token))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(AppError::validation(
                "message",
                format!("Unknown placeholders: {}", listed),
            ));
        }

        Ok(Self {
            text: text.to_string(),
        })
    }

    /// Appends `footer` on its own line unless the text already ends with it.
    pub fn with_footer(self, footer: &str) -> Self {
        let footer = footer.trim();
        if footer.is_empty() || self.text.trim_end().ends_with(footer) {
            return self;
        }
        Self {
            text: format!("{}\n{}", self.text.trim_end(), footer),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Renders the body for one recipient.
    pub fn render(&self, name: Option<&str>) -> String {
        let full_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(NAME_FALLBACK);
        let first_name = full_name.split_whitespace().next().unwrap_or(NAME_FALLBACK);

        PLACEHOLDER
            .replace_all(&self.text, |caps: &regex::Captures<'_>| {
                match caps.get(1).map(|m| m.as_str()) {
                    Some(FIRST_NAME) => first_name.to_string(),
                    Some(FULL_NAME) | Some(NAME) => full_name.to_string(),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}
