use chrono::DateTime;
use chrono_tz::Tz;
use thiserror::Error;

use crate::models::event::DraftEvent;
use crate::service::resolver::{self, Confidence, LocaleGrammar, ResolveError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no date or time expression found in the utterance")]
    NoTimeFound,
    #[error("the utterance has a time but no event title")]
    NoTitleFound,
}

/// A draft plus the resolver's confidence, so the coordinator can decide
/// whether to commit or ask first.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub draft: DraftEvent,
    pub confidence: Confidence,
}

// Verbs and filler that introduce a scheduling request; never part of a title.
const TRIGGER_WORDS: &[&str] = &[
    "schedule", "add", "create", "book", "arrange", "set", "up", "please", "remind",
];
const ARTICLES: &[&str] = &["a", "an", "the", "my"];
// Connectives that dangle at the edges once the time span is removed.
const EDGE_CONNECTIVES: &[&str] = &[
    "at", "on", "for", "from", "to", "in", "until", "till", "and", "is", "about", "me",
];
// Chinese particles the original segmenter dropped before titling.
const CN_TRIGGERS: &[&str] = &["帮我", "安排", "添加", "预约", "记得", "提醒我", "从", "的时候"];

/// Turns one utterance into a structured draft event. Interval resolution is
/// delegated entirely to the resolver; this layer only carves out the title.
pub struct EventExtractor {
    grammar: LocaleGrammar,
}

impl EventExtractor {
    pub fn new(grammar: LocaleGrammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> &LocaleGrammar {
        &self.grammar
    }

    pub fn extract(
        &self,
        utterance: &str,
        reference_now: DateTime<Tz>,
    ) -> Result<Extraction, ExtractError> {
        let resolved = resolver::resolve(utterance, reference_now, &self.grammar)
            .map_err(|ResolveError::NoTimeFound(_)| ExtractError::NoTimeFound)?;

        let remainder = resolved.strip_consumed(utterance);
        let title = clean_title(&remainder);
        if title.is_empty() {
            // No placeholder titles; the caller decides how to re-prompt.
            return Err(ExtractError::NoTitleFound);
        }

        Ok(Extraction {
            draft: DraftEvent {
                title,
                interval: resolved.interval,
                raw_utterance: utterance.to_string(),
            },
            confidence: resolved.confidence,
        })
    }
}

fn clean_title(remainder: &str) -> String {
    let mut text = remainder.to_string();
    for particle in CN_TRIGGERS {
        text = text.replace(particle, " ");
    }

    let mut words: Vec<&str> = text
        .split_whitespace()
        .filter(|word| {
            let lower = word.to_lowercase();
            let lower = lower.trim_matches(|c: char| c.is_ascii_punctuation());
            !TRIGGER_WORDS.contains(&lower) && !ARTICLES.contains(&lower) && !lower.is_empty()
        })
        .collect();

    while let Some(first) = words.first() {
        if EDGE_CONNECTIVES.contains(&first.to_lowercase().as_str()) {
            words.remove(0);
        } else {
            break;
        }
    }
    while let Some(last) = words.last() {
        if EDGE_CONNECTIVES.contains(&last.to_lowercase().as_str()) {
            words.pop();
        } else {
            break;
        }
    }

    words.join(" ").trim().to_string()
}
