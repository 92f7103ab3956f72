//! # Bot Error Types Module
//!
//! Typed errors raised while handling a single user message or delivering
//! the daily broadcast. Each variant carries the user-visible message for
//! that failure; transitions that return one of these must leave the stored
//! dialog state untouched.

/// Domain errors surfaced to users as retry prompts or rejections
#[derive(Debug, Clone)]
pub enum BotError {
    /// Input failed validation (non-numeric where a number was expected,
    /// malformed stall selector)
    Validation(String),
    /// Uniqueness conflict (room number taken, duplicate registration)
    Conflict(String),
    /// Referenced vendor or product does not exist
    NotFound(String),
    /// A broadcast message could not be delivered to one recipient
    Delivery(String),
}

impl BotError {
    /// The message shown to the user (or logged, for delivery failures)
    pub fn user_message(&self) -> &str {
        match self {
            BotError::Validation(msg)
            | BotError::Conflict(msg)
            | BotError::NotFound(msg)
            | BotError::Delivery(msg) => msg,
        }
    }
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotError::Validation(msg) => write!(f, "Validation error: {msg}"),
            BotError::Conflict(msg) => write!(f, "Conflict error: {msg}"),
            BotError::NotFound(msg) => write!(f, "Not found: {msg}"),
            BotError::Delivery(msg) => write!(f, "Delivery error: {msg}"),
        }
    }
}

impl std::error::Error for BotError {}
