use chrono::{DateTime, Utc};

use crate::backend::request::{sanitize_url_name, MAX_URL_NAME_CHARS};

pub const DEFAULT_MAX_URL_ATTEMPTS: u32 = 3;

/// Room for a `_YYYYMMDD` suffix within the url-name length cap.
const SUGGESTION_SUFFIX_ROOM: usize = 9;

/// How often to prompt again after a still-taken url-name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    PromptAgain { attempt: u32, max_attempts: u32 },
    Exhausted,
}

/// Bounded retry bookkeeping for url-name conflicts on one job.
///
/// Created at attempt 1 when the first conflict is observed, bumped on every
/// still-taken resolution, and fails closed once the counter passes the
/// limit: the prompt that would start an out-of-budget attempt is refused
/// before anything reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlNameRetry {
    attempt: u32,
    max_attempts: u32,
    taken_name: String,
}

impl UrlNameRetry {
    pub fn first(taken_name: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            taken_name: taken_name.into(),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn taken_name(&self) -> &str {
        self.taken_name.as_str()
    }

    /// Records one still-taken resolution and decides whether another prompt
    /// fits the budget.
    pub fn record_still_taken(&mut self) -> RetryVerdict {
        self.attempt += 1;
        if self.attempt > self.max_attempts {
            RetryVerdict::Exhausted
        } else {
            RetryVerdict::PromptAgain {
                attempt: self.attempt,
                max_attempts: self.max_attempts,
            }
        }
    }
}

/// Deterministic replacement-name candidates for a taken url name. Cosmetic
/// only: callers may show, pick from, or ignore them. Every candidate passes
/// `sanitize_url_name`.
pub fn suggest_url_names(taken_name: &str, now: DateTime<Utc>) -> Vec<String> {
    let base = suggestion_base(taken_name);
    let date = now.format("%Y%m%d");

    let mut suggestions = vec![
        format!("{base}_{date}"),
        format!("{base}_pack"),
        format!("{base}_2"),
        format!("{base}_3"),
    ];
    suggestions.retain(|name| sanitize_url_name(name.as_str()).is_ok());
    suggestions
}

fn suggestion_base(taken_name: &str) -> String {
    let mut base: String = taken_name
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect();
    if !base.chars().next().is_some_and(|ch| ch.is_ascii_alphabetic()) {
        base.insert_str(0, "pack");
    }
    base.truncate(MAX_URL_NAME_CHARS - SUGGESTION_SUFFIX_ROOM);
    base
}
