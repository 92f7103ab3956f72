//! # Bazaar Bot
//!
//! A Telegram bot for a produce market: vendors publish their daily stall
//! prices, customers browse prices, day-over-day changes and cheapest-stall
//! comparisons, and subscribers get a morning price digest.

pub mod bot;
pub mod broadcast;
pub mod db;
pub mod dialogue;
pub mod errors;
pub mod queries;
