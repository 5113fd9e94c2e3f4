//! Utilities module - text helpers and chat title derivation

pub mod text_utils;
pub mod title_deriver;

pub use text_utils::TextUtils;
pub use title_deriver::derive_title;
