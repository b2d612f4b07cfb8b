//! Maps gateway error text to a suppression decision.
//!
//! Matching is done on whole words, phrases and numeric codes against the
//! lowercased error text, checked in the order opt-out, hard failure, soft
//! failure. Unrecognized text is a soft failure.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::SuppressionCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The recipient asked to stop receiving messages
    OptOut,
    /// The number can never receive messages
    HardFail,
    /// Possibly recoverable; never suppressed
    SoftFail,
}

impl FailureCategory {
    /// The suppression store a failure of this category is written to.
    pub fn suppression(&self) -> Option<SuppressionCategory> {
        match self {
            FailureCategory::OptOut => Some(SuppressionCategory::OptOut),
            FailureCategory::HardFail => Some(SuppressionCategory::HardFail),
            FailureCategory::SoftFail => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::OptOut => "opt_out",
            FailureCategory::HardFail => "hard_fail",
            FailureCategory::SoftFail => "soft_fail",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Bare "end", "cancel" and "quit" are left out: they show up in ordinary
// gateway error text far more often than in opt-out notices.
const OPT_OUT_TERMS: &[&str] = &[
    "unsubscribed",
    "unsubscribe",
    "opted out",
    "opt out",
    "opt-out",
    "stop",
    "blocked",
    "21610",
    "30004",
];

const HARD_FAIL_TERMS: &[&str] = &[
    "invalid",
    "not a valid",
    "does not exist",
    "unknown subscriber",
    "unreachable",
    "landline",
    "not a mobile",
    "no route",
    "unassigned",
    "carrier violation",
    "21211",
    "21614",
    "30003",
    "30005",
    "30006",
    "30007",
];

const SOFT_FAIL_TERMS: &[&str] = &[
    "temporarily",
    "timeout",
    "timed out",
    "rate limit",
    "throttled",
    "throttle",
    "too many requests",
    "network",
    "connection",
    "service unavailable",
    "server error",
    "unavailable",
    "gateway",
    "20429",
    "429",
    "500",
    "502",
    "503",
    "504",
];

/// `\b(?:term|term)\b`, with internal whitespace matching any whitespace run.
fn whole_term_pattern(terms: &[&str]) -> Regex {
    let alternatives = terms
        .iter()
        .map(|term| {
            term.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&format!(r"\b(?:{})\b", alternatives)).expect("Invalid classifier pattern")
}

static RULES: LazyLock<[(FailureCategory, Regex); 3]> = LazyLock::new(|| {
    [
        (FailureCategory::OptOut, whole_term_pattern(OPT_OUT_TERMS)),
        (FailureCategory::HardFail, whole_term_pattern(HARD_FAIL_TERMS)),
        (FailureCategory::SoftFail, whole_term_pattern(SOFT_FAIL_TERMS)),
    ]
});

/// Classifies a gateway error text. Total: every input maps to a category.
pub fn classify(error_text: &str) -> FailureCategory {
    let text = error_text.to_lowercase();
    if text.trim().is_empty() {
        return FailureCategory::SoftFail;
    }

    RULES
        .iter()
        .find(|(_, pattern)| pattern.is_match(&text))
        .map(|(category, _)| *category)
        .unwrap_or(FailureCategory::SoftFail)
}
