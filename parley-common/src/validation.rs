//! Input validation and sanitization for user-supplied text.
//!
//! Sanitization strips script tags, protocol handlers, event handler
//! attributes and control characters, then normalizes whitespace.
//! Validation checks emptiness and length bounds, surfacing structured
//! [`Error::Validation`] values rather than bare strings.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Default maximum message length in characters.
pub const MESSAGE_DEFAULT_MAX_LENGTH: usize = 4_000;

static SCRIPT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"));
static JS_PROTOCOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript:").expect("valid regex"));
static EVENT_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)on\w+\s*=").expect("valid regex"));
static REPEATED_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").expect("valid regex"));
static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Sanitize user input by removing dangerous content and normalizing whitespace.
///
/// Removes script tags, `javascript:` handlers, inline event handlers and
/// control characters (keeping `\n`, `\t`, `\r`), collapses runs of spaces,
/// limits consecutive newlines to two, and trims.
pub fn sanitize_input(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut sanitized = SCRIPT_TAG.replace_all(text, "").into_owned();
    sanitized = JS_PROTOCOL.replace_all(&sanitized, "").into_owned();
    sanitized = EVENT_HANDLER.replace_all(&sanitized, "").into_owned();

    sanitized.retain(|c| !c.is_control() || c == '\n' || c == '\t' || c == '\r');

    sanitized = REPEATED_SPACES.replace_all(&sanitized, " ").into_owned();
    sanitized = EXCESS_NEWLINES.replace_all(&sanitized, "\n\n").into_owned();

    sanitized.trim().to_string()
}

/// Validate a user message against emptiness and length bounds.
pub fn validate_message(message: &str, max_length: usize) -> Result<()> {
    if message.trim().is_empty() {
        return Err(Error::validation(
            "message",
            "must not be empty",
            format!("{:?}", message),
        ));
    }

    let length = message.chars().count();
    if length > max_length {
        return Err(Error::validation(
            "message",
            format!("must be at most {max_length} characters"),
            length,
        ));
    }

    Ok(())
}

/// Sanitize then validate a message in one step, returning the clean text.
pub fn validate_and_sanitize(message: &str, max_length: usize) -> Result<String> {
    let sanitized = sanitize_input(message);
    validate_message(&sanitized, max_length)?;
    Ok(sanitized)
}
