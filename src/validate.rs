//! Request parameter predicates.
//!
//! Accepted alphabets:
//! - user names: ASCII letters, digits, `_` and space; 1 to 39 characters
//! - scope names: ASCII letters, `-` and `_`; 1 to 39 characters
//! - day counts: a positive decimal integer that fits in `u32`

use std::num::NonZeroU32;

/// Exclusive upper bound on user and scope name length.
pub const MAX_NAME_LEN: usize = 40;

pub fn is_valid_user_name(name: &str) -> bool {
    has_valid_len(name) && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
}

pub fn is_valid_scope(scope: &str) -> bool {
    has_valid_len(scope) && scope.chars().all(|c| c.is_ascii_alphabetic() || c == '-' || c == '_')
}

/// Parse a positive day count. Signs, blanks and zero are rejected.
pub fn parse_days(raw: &str) -> Option<NonZeroU32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

// Every accepted character is ASCII, so bytes and chars agree.
fn has_valid_len(s: &str) -> bool {
    !s.is_empty() && s.len() < MAX_NAME_LEN
}
