//! UI Builder module for creating reply keyboards and formatting messages

use teloxide::types::{ForceReply, KeyboardButton, KeyboardMarkup, ReplyMarkup};

use crate::dialogue::{
    stall_button_label, Keyboard, BTN_BACK, BTN_BROWSE_STALLS, BTN_CHEAPEST, BTN_ENTER_PRICES,
    BTN_HELP, BTN_MY_PRICES, BTN_MY_STALL, BTN_PRICE_CHANGES, BTN_REGISTER, BTN_SUBSCRIBE,
    BTN_UNSUBSCRIBE,
};
use crate::queries::{CheapestLine, PriceChange, PriceLine};

/// Group digits in threes; prices in toman get long quickly
pub fn format_price(price: i64) -> String {
    let digits = price.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// One bullet per product: "• Tomato: 12,000 toman (kg)"
pub fn format_price_lines(lines: &[PriceLine]) -> String {
    let mut result = String::new();
    for line in lines {
        result.push_str(&format!(
            "• {}: {} toman ({})\n",
            line.product,
            format_price(line.price),
            line.unit
        ));
    }
    result
}

/// Classify each delta as up, down or unchanged for display
pub fn format_price_changes(changes: &[PriceChange]) -> String {
    let mut result = String::new();
    for change in changes {
        if change.delta > 0 {
            result.push_str(&format!(
                "{}: ↑ {} toman\n",
                change.product,
                format_price(change.delta)
            ));
        } else if change.delta < 0 {
            result.push_str(&format!(
                "{}: ↓ {} toman\n",
                change.product,
                format_price(-change.delta)
            ));
        } else {
            result.push_str(&format!("{}: no change\n", change.product));
        }
    }
    result
}

/// One bullet per (product, stall) at the day's minimum price; ties show
/// every stall on its own line
pub fn format_cheapest_lines(lines: &[CheapestLine]) -> String {
    let mut result = String::new();
    for line in lines {
        result.push_str(&format!(
            "• {}: {} toman → {}\n",
            line.product,
            format_price(line.price),
            stall_button_label(line.room_number, &line.vendor)
        ));
    }
    result
}

/// Render a transport-free keyboard description to Telegram reply markup
pub fn render_keyboard(keyboard: &Keyboard) -> Option<ReplyMarkup> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::ForceReply => Some(ReplyMarkup::ForceReply(ForceReply::new())),
        Keyboard::Main { is_vendor } => Some(markup(main_menu_rows(*is_vendor))),
        Keyboard::VendorMenu => Some(markup(vendor_menu_rows())),
        Keyboard::Vendors(stalls) => {
            let mut rows: Vec<Vec<KeyboardButton>> = stalls
                .iter()
                .map(|(room, name)| vec![KeyboardButton::new(stall_button_label(*room, name))])
                .collect();
            rows.push(vec![KeyboardButton::new(BTN_BACK)]);
            Some(markup(rows))
        }
        Keyboard::Products(names) => {
            let mut rows: Vec<Vec<KeyboardButton>> = names
                .iter()
                .map(|name| vec![KeyboardButton::new(name.clone())])
                .collect();
            rows.push(vec![KeyboardButton::new(BTN_BACK)]);
            Some(markup(rows))
        }
    }
}

fn markup(rows: Vec<Vec<KeyboardButton>>) -> ReplyMarkup {
    ReplyMarkup::Keyboard(KeyboardMarkup::new(rows).resize_keyboard())
}

fn main_menu_rows(is_vendor: bool) -> Vec<Vec<KeyboardButton>> {
    let mut rows = Vec::new();
    if is_vendor {
        rows.push(vec![KeyboardButton::new(BTN_MY_STALL)]);
    } else {
        rows.push(vec![KeyboardButton::new(BTN_REGISTER)]);
    }
    rows.push(vec![KeyboardButton::new(BTN_BROWSE_STALLS)]);
    rows.push(vec![KeyboardButton::new(BTN_PRICE_CHANGES)]);
    rows.push(vec![KeyboardButton::new(BTN_CHEAPEST)]);
    rows.push(vec![
        KeyboardButton::new(BTN_SUBSCRIBE),
        KeyboardButton::new(BTN_UNSUBSCRIBE),
    ]);
    rows.push(vec![KeyboardButton::new(BTN_HELP)]);
    rows
}

fn vendor_menu_rows() -> Vec<Vec<KeyboardButton>> {
    vec![
        vec![KeyboardButton::new(BTN_ENTER_PRICES)],
        vec![KeyboardButton::new(BTN_MY_PRICES)],
        vec![KeyboardButton::new(BTN_BACK)],
    ]
}
