//! Daily broadcast job: once a day, push the cheapest price per product to
//! every subscriber.
//!
//! Delivery is best-effort per recipient. A blocked or unreachable
//! subscriber is logged and skipped; nothing is retried within a run and no
//! failure aborts the rest of the fan-out.

use anyhow::Result;
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use log::{error, info, warn};
use rusqlite::Connection;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;

use crate::bot::ui_builder::format_price;
use crate::db::{self, market_date};
use crate::errors::BotError;
use crate::queries;

/// Format the one summary message sent to every subscriber
pub fn build_daily_summary(conn: &Connection, date: NaiveDate) -> Result<String> {
    let summary = queries::cheapest_summary(conn, date)?;

    let mut msg = format!("Market prices for {}\n\n", market_date(date));
    if summary.is_empty() {
        msg.push_str("No prices have been entered yet today.");
    } else {
        for (product, price) in &summary {
            msg.push_str(&format!("{}: {} toman\n", product, format_price(*price)));
        }
        msg.push_str("\nOpen the bot for per-stall details!");
    }

    Ok(msg)
}

/// Send the day's summary to all current subscribers.
///
/// The subscriber snapshot and the message are read under the lock, then
/// the lock is released before any network send so a slow broadcast never
/// blocks interactive message handling.
pub async fn run_daily_broadcast(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    date: NaiveDate,
) -> Result<()> {
    let (subscribers, message) = {
        let conn = conn.lock().await;
        (db::list_subscribers(&conn)?, build_daily_summary(&conn, date)?)
    };

    info!(
        "Broadcasting daily summary for {} to {} subscribers",
        market_date(date),
        subscribers.len()
    );

    for user_id in subscribers {
        if let Err(e) = bot.send_message(ChatId(user_id), message.clone()).await {
            let delivery = BotError::Delivery(format!("user {user_id}: {e}"));
            warn!("{delivery}");
        }
    }

    Ok(())
}

/// Sleep until the configured local time each day, then run the broadcast.
/// Stands in for an external scheduler; spawned once from main.
pub async fn run_scheduler(bot: Bot, conn: Arc<Mutex<Connection>>, at: NaiveTime) {
    loop {
        let now = Local::now().naive_local();
        let todays_run = now.date().and_time(at);
        let next = if todays_run <= now {
            todays_run + Duration::days(1)
        } else {
            todays_run
        };

        let wait = (next - now)
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(60));
        tokio::time::sleep(wait).await;

        let date = Local::now().date_naive();
        if let Err(e) = run_daily_broadcast(&bot, &conn, date).await {
            error!("Daily broadcast failed: {e:?}");
        }
    }
}
