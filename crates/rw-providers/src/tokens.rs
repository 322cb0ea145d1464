//! Pre-flight token estimates.
//!
//! These are heuristics, not a tokenizer: roughly four characters per token
//! for English prose, worse for code and non-Latin scripts. Use them for
//! logging and rough sizing only. Billing always uses the usage the backend
//! reports.

use crate::types::Message;

const CHARS_PER_TOKEN: usize = 4;
/// Role markers and separators each backend wraps around a message.
const PER_MESSAGE_OVERHEAD: u64 = 4;

/// `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Estimated prompt size of a message list.
pub fn estimate_messages(messages: &[Message]) -> u64 {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content) + PER_MESSAGE_OVERHEAD)
        .sum()
}
