//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules for better organization:
//! - `message_handler`: the teloxide endpoint with per-message isolation
//! - `dialogue_manager`: the conversation state machine (transport-free)
//! - `ui_builder`: reply keyboards and message formatting

pub mod dialogue_manager;
pub mod message_handler;
pub mod ui_builder;

// Re-export main handler functions for use in main.rs
pub use message_handler::message_handler;

// Re-export the state machine entry point for integration tests
pub use dialogue_manager::handle_text;
