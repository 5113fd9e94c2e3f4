//! Rule-based chat titles.
//!
//! The title comes from the first user text, optionally enriched with the
//! opening of the first assistant reply. Pure: the same transcript always
//! yields the same title.

use std::collections::HashSet;
use regex::Regex;
use lazy_static::lazy_static;

use super::text_utils::TextUtils;
use crate::transcript::{ChatMessage, Role};

pub const MAX_TITLE_WORDS: usize = 6;
pub const MAX_TITLE_CHARS: usize = 120;
const MAX_ASSISTANT_CHARS: usize = 120;

lazy_static! {
    static ref FILLER_PREFIX: Regex =
        Regex::new(r"(?i)^(sure|okay|ok|great|absolutely|certainly)[,!.\s]+").unwrap();
    static ref BRACKET_CHARS: Regex = Regex::new(r#"[`"'()\[\]{}<>_*~]"#).unwrap();
    static ref PUNCTUATION_RUNS: Regex = Regex::new(r"[.,!?;:/\\|]+").unwrap();

    static ref STOP_WORDS: HashSet<&'static str> = [
        // articles, conjunctions, auxiliaries
        "a", "an", "the", "and", "or", "are", "as", "be", "is", "it", "its",
        "this", "that", "do", "can", "could", "would",
        // pronouns
        "i", "me", "my", "you", "your", "we", "us", "our", "they", "them",
        "their", "he", "she", "him", "her",
        // prepositions
        "at", "by", "for", "from", "in", "of", "on", "to", "with", "about",
        "into", "over", "under", "between", "through", "after", "before", "without",
        // request fillers
        "please", "tell", "how", "what",
    ]
    .into_iter()
    .collect();
}

fn first_text_for(messages: &[ChatMessage], role: Role) -> Option<String> {
    messages
        .iter()
        .filter(|message| message.role == role)
        .map(ChatMessage::plain_text)
        .find(|text| !text.is_empty())
}

fn assistant_context(messages: &[ChatMessage]) -> Option<String> {
    let text = first_text_for(messages, Role::Assistant)?;
    let stripped = FILLER_PREFIX.replace(&text, "");
    let normalized = TextUtils::normalize_whitespace(&stripped);
    let clipped = TextUtils::truncate_chars(&normalized, MAX_ASSISTANT_CHARS);
    if clipped.is_empty() {
        None
    } else {
        Some(clipped.to_string())
    }
}

/// `None` when no user message carries text.
pub fn derive_title(messages: &[ChatMessage]) -> Option<String> {
    let user_text = first_text_for(messages, Role::User)?;

    let source = match assistant_context(messages) {
        Some(assistant_text) => format!("{} {}", user_text, assistant_text),
        None => user_text,
    };

    let without_brackets = BRACKET_CHARS.replace_all(&source, " ");
    let without_punctuation = PUNCTUATION_RUNS.replace_all(&without_brackets, " ");
    let sanitized = TextUtils::normalize_whitespace(&without_punctuation);
    if sanitized.is_empty() {
        return None;
    }

    let raw_words: Vec<&str> = sanitized.split(' ').collect();
    let keywords: Vec<&str> = raw_words
        .iter()
        .copied()
        .filter(|word| !STOP_WORDS.contains(word.to_lowercase().as_str()))
        .collect();
    let words = if keywords.len() >= 2 { keywords } else { raw_words };

    let title = words
        .iter()
        .take(MAX_TITLE_WORDS)
        .map(|word| TextUtils::title_case_word(word))
        .collect::<Vec<_>>()
        .join(" ");
    let title = TextUtils::truncate_chars(&title, MAX_TITLE_CHARS).trim().to_string();

    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
