//! Dialogue Manager module: the conversation state machine.
//!
//! `handle_text` is the whole contract: (user, inbound text) in, reply plus
//! keyboard description out. It re-reads the stored state on every message, writes
//! the next state before returning, and never touches the transport, so the
//! full flow is testable against a bare database connection.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::info;
use rusqlite::Connection;

use crate::db;
use crate::dialogue::{
    parse_intent, parse_price, parse_room_number, parse_stall_selector, stall_button_label,
    validate_stall_name, DialogState, Intent, Keyboard, Reply,
};
use crate::errors::BotError;
use crate::queries;

use super::ui_builder::{
    format_cheapest_lines, format_price, format_price_changes, format_price_lines,
};

/// Handle one inbound text message for one user.
///
/// Typed domain errors (validation, conflict, not-found) become user-visible
/// replies and leave the stored state exactly as it was; anything else
/// propagates for the transport layer to log.
pub fn handle_text(conn: &Connection, user_id: i64, text: &str, today: NaiveDate) -> Result<Reply> {
    let state = db::load_dialog_state(conn, user_id)?.unwrap_or_default();

    match dispatch(conn, user_id, state, text, today) {
        Ok(reply) => Ok(reply),
        Err(e) => match e.downcast::<BotError>() {
            Ok(bot_err) => {
                info!("Rejected input from user {user_id}: {bot_err}");
                Ok(Reply::plain(bot_err.user_message()))
            }
            Err(other) => Err(other),
        },
    }
}

fn dispatch(
    conn: &Connection,
    user_id: i64,
    state: DialogState,
    text: &str,
    today: NaiveDate,
) -> Result<Reply> {
    // /start, Back and Help short-circuit from any state, resetting the
    // user to the root menu without touching anything else.
    match parse_intent(text) {
        Some(Intent::Start) | Some(Intent::Back) => return main_menu(conn, user_id, today),
        Some(Intent::Help) => return help(conn, user_id),
        _ => {}
    }

    match state {
        menu @ (DialogState::Main | DialogState::VendorMenu) => {
            menu_intent(conn, user_id, &menu, text, today)
        }
        DialogState::RegisterName => register_name(conn, user_id, text),
        DialogState::RegisterRoom { name } => register_room(conn, user_id, &name, text),
        DialogState::ChoosingVendor => show_stall_prices(conn, text, today),
        DialogState::SelectingProduct { vendor_id } => {
            select_product(conn, user_id, vendor_id, text)
        }
        DialogState::AwaitingPrice {
            vendor_id,
            product_id,
            product_name,
        } => record_price(conn, user_id, vendor_id, product_id, &product_name, text, today),
    }
}

fn menu_intent(
    conn: &Connection,
    user_id: i64,
    state: &DialogState,
    text: &str,
    today: NaiveDate,
) -> Result<Reply> {
    let Some(intent) = parse_intent(text) else {
        // Unrecognized free text at the root menu is ignored; in the vendor
        // panel a short nudge is friendlier than silence.
        return Ok(match state {
            DialogState::VendorMenu => Reply::plain("Pick an option from the stall panel."),
            _ => Reply::silent(),
        });
    };

    match intent {
        Intent::Start | Intent::Back => main_menu(conn, user_id, today),
        Intent::Help => help(conn, user_id),
        Intent::Register => start_registration(conn, user_id),
        Intent::BrowseStalls => browse_stalls(conn, user_id),
        Intent::PriceChanges => price_changes_view(conn, today),
        Intent::CheapestPerProduct => cheapest_view(conn, today),
        Intent::Subscribe => subscribe(conn, user_id),
        Intent::Unsubscribe => unsubscribe(conn, user_id),
        Intent::MyStall => open_vendor_menu(conn, user_id),
        Intent::EnterPrices => enter_prices(conn, user_id),
        Intent::MyPrices => my_prices(conn, user_id, today),
    }
}

fn main_menu(conn: &Connection, user_id: i64, today: NaiveDate) -> Result<Reply> {
    let is_vendor = db::vendor_by_owner(conn, user_id)?.is_some();
    db::save_dialog_state(conn, user_id, &DialogState::Main)?;

    Ok(Reply::with_keyboard(
        format!(
            "Welcome to the market price bot!\n\nToday: {}",
            db::market_date(today)
        ),
        Keyboard::Main { is_vendor },
    ))
}

fn help(conn: &Connection, user_id: i64) -> Result<Reply> {
    let is_vendor = db::vendor_by_owner(conn, user_id)?.is_some();
    db::save_dialog_state(conn, user_id, &DialogState::Main)?;

    Ok(Reply::with_keyboard(
        "Market price bot\n\n\
         Customers: browse stall prices, compare against yesterday, find the \
         cheapest stall per product, and subscribe to the morning digest.\n\n\
         Vendors: send /register once to claim your stall, then enter your \
         prices each morning from the stall panel.",
        Keyboard::Main { is_vendor },
    ))
}

fn start_registration(conn: &Connection, user_id: i64) -> Result<Reply> {
    if db::vendor_by_owner(conn, user_id)?.is_some() {
        return Err(BotError::Conflict("You are already registered!".to_string()).into());
    }

    db::save_dialog_state(conn, user_id, &DialogState::RegisterName)?;
    Ok(Reply::plain("What is your stall's name?"))
}

fn register_name(conn: &Connection, user_id: i64, text: &str) -> Result<Reply> {
    let name = match validate_stall_name(text) {
        Ok(name) => name,
        Err("too_long") => {
            return Err(BotError::Validation(
                "That name is too long. Please keep it under 100 characters.".to_string(),
            )
            .into())
        }
        Err(_) => {
            return Err(
                BotError::Validation("Please send your stall's name as text.".to_string()).into(),
            )
        }
    };

    db::save_dialog_state(conn, user_id, &DialogState::RegisterRoom { name })?;
    Ok(Reply::plain("Now send your room number (e.g. 12):"))
}

fn register_room(conn: &Connection, user_id: i64, name: &str, text: &str) -> Result<Reply> {
    let room_number = parse_room_number(text).ok_or_else(|| {
        BotError::Validation("Only numbers allowed. Send your room number as digits.".to_string())
    })?;

    // Friendly pre-check; the UNIQUE constraint in create_vendor still
    // decides the race if two users submit the same room at once.
    if db::vendor_by_room(conn, room_number)?.is_some() {
        return Err(BotError::Conflict(
            "That room number is already registered. Contact the admin if it is yours.".to_string(),
        )
        .into());
    }

    db::create_vendor(conn, user_id, name, room_number)?;
    db::save_dialog_state(conn, user_id, &DialogState::Main)?;
    info!("User {user_id} registered stall '{name}' in room {room_number}");

    Ok(Reply::with_keyboard(
        format!("Stall {name} registered with room {room_number}!\nYou can now enter prices."),
        Keyboard::Main { is_vendor: true },
    ))
}

fn browse_stalls(conn: &Connection, user_id: i64) -> Result<Reply> {
    let vendors = db::list_active_vendors(conn)?;
    if vendors.is_empty() {
        return Ok(Reply::plain("No stalls are registered yet."));
    }

    db::save_dialog_state(conn, user_id, &DialogState::ChoosingVendor)?;
    let stalls = vendors
        .iter()
        .map(|v| (v.room_number, v.name.clone()))
        .collect();
    Ok(Reply::with_keyboard("Pick a stall:", Keyboard::Vendors(stalls)))
}

/// Stays in ChoosingVendor so the user can check several stalls in a row
fn show_stall_prices(conn: &Connection, text: &str, today: NaiveDate) -> Result<Reply> {
    let room_number = parse_stall_selector(text).ok_or_else(|| {
        BotError::Validation("Please pick a stall from the keyboard.".to_string())
    })?;

    let vendor = db::vendor_by_room(conn, room_number)?
        .ok_or_else(|| BotError::NotFound("No stall with that number.".to_string()))?;

    let lines = queries::prices_for_vendor(conn, vendor.id, today)?;
    if lines.is_empty() {
        return Ok(Reply::plain(format!(
            "{}\n\nNo prices entered today.",
            stall_button_label(vendor.room_number, &vendor.name)
        )));
    }

    Ok(Reply::plain(format!(
        "Today's prices at {} ({})\n\n{}",
        stall_button_label(vendor.room_number, &vendor.name),
        db::market_date(today),
        format_price_lines(&lines)
    )))
}

fn price_changes_view(conn: &Connection, today: NaiveDate) -> Result<Reply> {
    let yesterday = today
        .pred_opt()
        .ok_or_else(|| anyhow!("no calendar day before {today}"))?;

    let changes = queries::price_changes(conn, today, yesterday)?;
    if changes.is_empty() {
        return Ok(Reply::plain(
            "No stall has prices recorded for both today and yesterday.",
        ));
    }

    Ok(Reply::plain(format!(
        "Price changes vs yesterday:\n\n{}",
        format_price_changes(&changes)
    )))
}

fn cheapest_view(conn: &Connection, today: NaiveDate) -> Result<Reply> {
    let lines = queries::cheapest_per_product(conn, today)?;
    if lines.is_empty() {
        return Ok(Reply::plain("No prices entered today."));
    }

    Ok(Reply::plain(format!(
        "Cheapest stalls today:\n\n{}",
        format_cheapest_lines(&lines)
    )))
}

fn subscribe(conn: &Connection, user_id: i64) -> Result<Reply> {
    if db::add_subscriber(conn, user_id)? {
        info!("User {user_id} subscribed to the daily digest");
        Ok(Reply::plain(
            "Subscribed! You will get the price summary every morning.",
        ))
    } else {
        Ok(Reply::plain("You are already subscribed."))
    }
}

fn unsubscribe(conn: &Connection, user_id: i64) -> Result<Reply> {
    if db::remove_subscriber(conn, user_id)? {
        info!("User {user_id} unsubscribed from the daily digest");
        Ok(Reply::plain("Unsubscribed."))
    } else {
        Ok(Reply::plain("You were not subscribed."))
    }
}

fn require_vendor(conn: &Connection, user_id: i64) -> Result<db::Vendor> {
    db::vendor_by_owner(conn, user_id)?.ok_or_else(|| {
        BotError::NotFound(
            "You don't have a stall yet. Send /register to create one.".to_string(),
        )
        .into()
    })
}

fn open_vendor_menu(conn: &Connection, user_id: i64) -> Result<Reply> {
    let vendor = require_vendor(conn, user_id)?;
    db::save_dialog_state(conn, user_id, &DialogState::VendorMenu)?;

    Ok(Reply::with_keyboard(
        format!(
            "{} - what would you like to do?",
            stall_button_label(vendor.room_number, &vendor.name)
        ),
        Keyboard::VendorMenu,
    ))
}

fn enter_prices(conn: &Connection, user_id: i64) -> Result<Reply> {
    let vendor = require_vendor(conn, user_id)?;

    let products = db::list_products(conn)?;
    db::save_dialog_state(
        conn,
        user_id,
        &DialogState::SelectingProduct {
            vendor_id: vendor.id,
        },
    )?;

    let names = products.into_iter().map(|p| p.name).collect();
    Ok(Reply::with_keyboard("Pick a product:", Keyboard::Products(names)))
}

fn my_prices(conn: &Connection, user_id: i64, today: NaiveDate) -> Result<Reply> {
    let vendor = require_vendor(conn, user_id)?;

    let lines = queries::prices_for_vendor(conn, vendor.id, today)?;
    if lines.is_empty() {
        return Ok(Reply::plain("You have not entered any prices today."));
    }

    Ok(Reply::plain(format!(
        "Your prices ({})\n\n{}",
        db::market_date(today),
        format_price_lines(&lines)
    )))
}

fn select_product(conn: &Connection, user_id: i64, vendor_id: i64, text: &str) -> Result<Reply> {
    let product = db::product_by_name(conn, text.trim())?
        .ok_or_else(|| BotError::NotFound("Pick a product from the keyboard.".to_string()))?;

    db::save_dialog_state(
        conn,
        user_id,
        &DialogState::AwaitingPrice {
            vendor_id,
            product_id: product.id,
            product_name: product.name.clone(),
        },
    )?;

    Ok(Reply::with_keyboard(
        format!(
            "Send today's price for {} (toman per {}):",
            product.name, product.unit
        ),
        Keyboard::ForceReply,
    ))
}

/// Returns to SelectingProduct so a vendor can price the whole stall in one
/// sitting without re-opening the menu
fn record_price(
    conn: &Connection,
    user_id: i64,
    vendor_id: i64,
    product_id: i64,
    product_name: &str,
    text: &str,
    today: NaiveDate,
) -> Result<Reply> {
    let price = parse_price(text)
        .ok_or_else(|| BotError::Validation("Only numbers allowed.".to_string()))?;

    db::upsert_price(conn, vendor_id, product_id, today, price)?;
    db::save_dialog_state(conn, user_id, &DialogState::SelectingProduct { vendor_id })?;

    let names = db::list_products(conn)?.into_iter().map(|p| p.name).collect();
    Ok(Reply::with_keyboard(
        format!(
            "Saved: {} at {} toman.\nPick another product, or press Back when you are done.",
            product_name,
            format_price(price)
        ),
        Keyboard::Products(names),
    ))
}
