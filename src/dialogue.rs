//! Dialogue module: per-user conversation state, the intents resolved from
//! button labels, and the input validators used at state transitions.
//!
//! The state is a tagged union with one context record per variant. It is
//! serialized only at the persistence boundary, as a (tag, context JSON)
//! pair matching the dialog_states table columns.

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// The step a user is currently at in a multi-message flow
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "context", rename_all = "snake_case")]
pub enum DialogState {
    /// Root menu
    #[default]
    Main,
    /// Vendor panel menu, reachable only for registered vendors
    VendorMenu,
    /// Registration: waiting for the stall name
    RegisterName,
    /// Registration: waiting for the room number
    RegisterRoom { name: String },
    /// Customer picked "browse stalls" and must now select one
    ChoosingVendor,
    /// Vendor is picking which product to price
    SelectingProduct { vendor_id: i64 },
    /// Vendor must now send the price for the chosen product
    AwaitingPrice {
        vendor_id: i64,
        product_id: i64,
        product_name: String,
    },
}

impl DialogState {
    /// Split into the (state, context) columns of the dialog_states table
    pub fn to_storage(&self) -> Result<(String, Option<String>)> {
        let value = serde_json::to_value(self)?;
        let tag = value
            .get("state")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("dialog state serialized without a tag"))?
            .to_string();
        let context = match value.get("context") {
            Some(ctx) => Some(serde_json::to_string(ctx)?),
            None => None,
        };
        Ok((tag, context))
    }

    /// Rebuild from the stored (state, context) columns
    pub fn from_storage(tag: &str, context: Option<&str>) -> Result<Self> {
        let mut value = serde_json::json!({ "state": tag });
        if let Some(ctx) = context {
            value["context"] = serde_json::from_str(ctx)?;
        }
        Ok(serde_json::from_value(value)?)
    }
}

// Button labels. Display strings live here once; control flow only ever
// sees the parsed Intent.
pub const BTN_BROWSE_STALLS: &str = "Browse stalls";
pub const BTN_PRICE_CHANGES: &str = "Price changes vs yesterday";
pub const BTN_CHEAPEST: &str = "Cheapest stall per product";
pub const BTN_SUBSCRIBE: &str = "Daily price digest";
pub const BTN_UNSUBSCRIBE: &str = "Unsubscribe";
pub const BTN_HELP: &str = "Help";
pub const BTN_BACK: &str = "Back";
pub const BTN_REGISTER: &str = "Register my stall";
pub const BTN_MY_STALL: &str = "My stall";
pub const BTN_ENTER_PRICES: &str = "Enter today's prices";
pub const BTN_MY_PRICES: &str = "My prices today";

/// What the user asked for, resolved once at the message boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    Start,
    Help,
    Back,
    Register,
    BrowseStalls,
    PriceChanges,
    CheapestPerProduct,
    Subscribe,
    Unsubscribe,
    MyStall,
    EnterPrices,
    MyPrices,
}

/// Resolve an exact button label or command to an intent
pub fn parse_intent(text: &str) -> Option<Intent> {
    match text.trim() {
        "/start" => Some(Intent::Start),
        "/help" | BTN_HELP => Some(Intent::Help),
        BTN_BACK => Some(Intent::Back),
        "/register" | BTN_REGISTER => Some(Intent::Register),
        BTN_BROWSE_STALLS => Some(Intent::BrowseStalls),
        BTN_PRICE_CHANGES => Some(Intent::PriceChanges),
        BTN_CHEAPEST => Some(Intent::CheapestPerProduct),
        BTN_SUBSCRIBE => Some(Intent::Subscribe),
        BTN_UNSUBSCRIBE => Some(Intent::Unsubscribe),
        BTN_MY_STALL => Some(Intent::MyStall),
        BTN_ENTER_PRICES => Some(Intent::EnterPrices),
        BTN_MY_PRICES => Some(Intent::MyPrices),
        _ => None,
    }
}

/// Transport-free description of the reply keyboard to show next
#[derive(Clone, Debug, PartialEq)]
pub enum Keyboard {
    /// Leave the current keyboard as it is
    None,
    /// Root menu; vendors additionally get the stall-panel buttons
    Main { is_vendor: bool },
    /// One button per stall as (room_number, stall name), plus Back
    Vendors(Vec<(i64, String)>),
    /// One button per product name, plus Back
    Products(Vec<String>),
    /// The vendor panel
    VendorMenu,
    /// Force the next message to be a reply to this prompt
    ForceReply,
}

/// What the state machine wants sent back for one inbound message
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Keyboard,
}

impl Reply {
    pub fn plain(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            keyboard: Keyboard::None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Reply {
            text: text.into(),
            keyboard,
        }
    }

    /// Unrecognized free text at the root menu is ignored entirely
    pub fn silent() -> Self {
        Reply {
            text: String::new(),
            keyboard: Keyboard::None,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.text.is_empty()
    }
}

/// Validates a stall name input
pub fn validate_stall_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.len() > 100 {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}

fn parse_digits(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Room numbers are positive integers
pub fn parse_room_number(text: &str) -> Option<i64> {
    parse_digits(text).filter(|n| *n > 0)
}

/// Prices are non-negative integers (the currency has no subunit)
pub fn parse_price(text: &str) -> Option<i64> {
    parse_digits(text)
}

static STALL_SELECTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Stall\s+(\d+)").expect("stall selector regex is valid"));

/// The label shown on a stall button and matched back by the selector
pub fn stall_button_label(room_number: i64, name: &str) -> String {
    format!("Stall {room_number} - {name}")
}

/// Extract the room number from a stall button press
pub fn parse_stall_selector(text: &str) -> Option<i64> {
    STALL_SELECTOR
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stall_name_validation() {
        // Valid names
        assert!(validate_stall_name("Akbar's Fruits").is_ok());
        assert!(validate_stall_name("  Fresh Corner  ").is_ok());

        // Invalid names
        assert!(validate_stall_name("").is_err());
        assert!(validate_stall_name("   ").is_err());
        assert!(validate_stall_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_stall_name_trimming() {
        let result = validate_stall_name("  Fresh Corner  ");
        assert_eq!(result.unwrap(), "Fresh Corner");
    }

    #[test]
    fn test_room_number_parsing() {
        assert_eq!(parse_room_number("12"), Some(12));
        assert_eq!(parse_room_number(" 7 "), Some(7));
        assert_eq!(parse_room_number("0"), None);
        assert_eq!(parse_room_number("-3"), None);
        assert_eq!(parse_room_number("twelve"), None);
        assert_eq!(parse_room_number("12a"), None);
        assert_eq!(parse_room_number(""), None);
    }

    #[test]
    fn test_price_parsing() {
        assert_eq!(parse_price("1000"), Some(1000));
        assert_eq!(parse_price("0"), Some(0));
        assert_eq!(parse_price("1,000"), None);
        assert_eq!(parse_price("-5"), None);
        assert_eq!(parse_price("cheap"), None);
    }

    #[test]
    fn test_stall_selector_round_trip() {
        let label = stall_button_label(12, "Akbar's Fruits");
        assert_eq!(label, "Stall 12 - Akbar's Fruits");
        assert_eq!(parse_stall_selector(&label), Some(12));

        assert_eq!(parse_stall_selector("Stall 7"), Some(7));
        assert_eq!(parse_stall_selector("stall 7"), None);
        assert_eq!(parse_stall_selector("Room 7 - X"), None);
    }

    #[test]
    fn test_intent_parsing() {
        assert_eq!(parse_intent("/start"), Some(Intent::Start));
        assert_eq!(parse_intent(BTN_BROWSE_STALLS), Some(Intent::BrowseStalls));
        assert_eq!(parse_intent(BTN_ENTER_PRICES), Some(Intent::EnterPrices));
        assert_eq!(parse_intent("  Back  "), Some(Intent::Back));
        assert_eq!(parse_intent("free text"), None);
    }

    #[test]
    fn test_state_storage_unit_variant() {
        let (tag, context) = DialogState::Main.to_storage().unwrap();
        assert_eq!(tag, "main");
        assert!(context.is_none());

        let restored = DialogState::from_storage("main", None).unwrap();
        assert_eq!(restored, DialogState::Main);
    }

    #[test]
    fn test_state_storage_context_variants() {
        let state = DialogState::AwaitingPrice {
            vendor_id: 3,
            product_id: 9,
            product_name: "Tomato".to_string(),
        };
        let (tag, context) = state.to_storage().unwrap();
        assert_eq!(tag, "awaiting_price");
        let context = context.unwrap();
        assert!(context.contains("Tomato"));

        let restored = DialogState::from_storage(&tag, Some(&context)).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_state_storage_rejects_unknown_tag() {
        assert!(DialogState::from_storage("time_travel", None).is_err());
    }
}
