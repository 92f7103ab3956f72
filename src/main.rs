use anyhow::Result;
use chrono::NaiveTime;
use log::info;
use rusqlite::Connection;
use std::env;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;

use bazaar_bot::{bot, broadcast, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    info!("Starting Bazaar Telegram Bot");

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Get bot token from environment
    let bot_token = env::var("TELEGRAM_BOT_TOKEN").expect("TELEGRAM_BOT_TOKEN must be set");

    // Get database path from environment
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    // Local time of day the daily digest goes out
    let broadcast_time = env::var("BROADCAST_TIME").unwrap_or_else(|_| "08:00".to_string());
    let broadcast_time = NaiveTime::parse_from_str(&broadcast_time, "%H:%M")
        .expect("BROADCAST_TIME must be HH:MM");

    info!("Initializing database at: {database_url}");

    // Create database connection
    let conn = Connection::open(&database_url)?;

    // Initialize database schema and seed the product catalog (idempotent)
    db::init_database_schema(&conn)?;
    db::seed_initial_products(&conn)?;

    // Wrap connection in Arc<Mutex> for sharing across async tasks
    let shared_conn = Arc::new(Mutex::new(conn));

    // Initialize the bot
    let bot = Bot::new(bot_token);

    // Kick off the daily digest scheduler
    tokio::spawn(broadcast::run_scheduler(
        bot.clone(),
        Arc::clone(&shared_conn),
        broadcast_time,
    ));

    info!("Bot initialized, starting dispatcher");

    // Set up the dispatcher with shared connection
    let handler = dptree::entry().branch(Update::filter_message().endpoint({
        let conn = Arc::clone(&shared_conn);
        move |bot: Bot, msg: Message| {
            let conn = Arc::clone(&conn);
            async move { bot::message_handler(bot, msg, conn).await }
        }
    }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
