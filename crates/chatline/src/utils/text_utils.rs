//! Text helpers shared by title derivation and prompt building

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Collapse whitespace runs to one space and trim; borrows when already clean
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        let trimmed = text.trim();
        if trimmed.split(' ').any(str::is_empty) || trimmed.contains(|c: char| c.is_whitespace() && c != ' ') {
            Cow::Owned(WHITESPACE_REGEX.replace_all(trimmed, " ").into_owned())
        } else {
            Cow::Borrowed(trimmed)
        }
    }

    /// First `max_chars` characters, never splitting a UTF-8 sequence
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &text[..byte_idx],
            None => text,
        }
    }

    /// First character uppercased, the rest lowercased
    pub fn title_case_word(word: &str) -> String {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        }
    }

    pub fn count_words(text: &str) -> usize {
        text.split_whitespace().count()
    }
}
