//! Name and topic validation.

use crate::error::AuthError;

/// Name of the anonymous principal.
pub const EVERYONE: &str = "*";

/// Maximum length of a topic, pattern or tier code.
pub const TOPIC_MAX_LEN: usize = 64;

#[inline]
fn is_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// `^[-_.@+a-zA-Z0-9]+$`
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'))
}

/// A username or the Everyone principal.
#[inline]
pub fn is_valid_principal(name: &str) -> bool {
    name == EVERYONE || is_valid_username(name)
}

/// `^[-_A-Za-z0-9]{1,64}$`
pub fn is_valid_topic(topic: &str) -> bool {
    (1..=TOPIC_MAX_LEN).contains(&topic.len()) && topic.chars().all(is_topic_char)
}

/// Like a topic, but `*` is allowed anywhere.
pub fn is_valid_topic_pattern(pattern: &str) -> bool {
    (1..=TOPIC_MAX_LEN).contains(&pattern.len())
        && pattern.chars().all(|c| c == '*' || is_topic_char(c))
}

/// Tier codes follow the topic alphabet.
#[inline]
pub fn is_valid_tier_code(code: &str) -> bool {
    is_valid_topic(code)
}

pub(crate) fn username(name: &str) -> Result<(), AuthError> {
    if is_valid_username(name) {
        Ok(())
    } else {
        Err(AuthError::invalid(format!("username '{name}'")))
    }
}

pub(crate) fn principal(name: &str) -> Result<(), AuthError> {
    if is_valid_principal(name) {
        Ok(())
    } else {
        Err(AuthError::invalid(format!("username '{name}'")))
    }
}

pub(crate) fn topic(topic: &str) -> Result<(), AuthError> {
    if is_valid_topic(topic) {
        Ok(())
    } else {
        Err(AuthError::invalid(format!("topic '{topic}'")))
    }
}

pub(crate) fn topic_pattern(pattern: &str) -> Result<(), AuthError> {
    if is_valid_topic_pattern(pattern) {
        Ok(())
    } else {
        Err(AuthError::invalid(format!("topic pattern '{pattern}'")))
    }
}

pub(crate) fn tier_code(code: &str) -> Result<(), AuthError> {
    if is_valid_tier_code(code) {
        Ok(())
    } else {
        Err(AuthError::invalid(format!("tier code '{code}'")))
    }
}
