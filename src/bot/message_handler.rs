//! Message Handler module: the teloxide-facing glue.
//!
//! Everything interesting happens in the dialogue manager; this endpoint
//! only extracts the text, holds the connection lock for the duration of
//! the transition, renders the keyboard, and isolates failures so one
//! bad message can never take the process down or leak into another user's
//! conversation.

use anyhow::Result;
use chrono::Local;
use log::{error, info};
use rusqlite::Connection;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;

use super::dialogue_manager::handle_text;
use super::ui_builder::render_keyboard;

pub async fn message_handler(bot: Bot, msg: Message, conn: Arc<Mutex<Connection>>) -> Result<()> {
    let Some(text) = msg.text() else {
        // Photos, stickers and the like are not part of any flow
        return Ok(());
    };

    let user_id = msg.chat.id.0;
    info!("Received text message from user {user_id}");

    let today = Local::now().date_naive();
    let reply = {
        let conn = conn.lock().await;
        handle_text(&conn, user_id, text, today)
    };

    match reply {
        Ok(reply) if reply.is_silent() => {}
        Ok(reply) => {
            let mut request = bot.send_message(msg.chat.id, reply.text.clone());
            if let Some(markup) = render_keyboard(&reply.keyboard) {
                request = request.reply_markup(markup);
            }
            request.await?;
        }
        Err(e) => {
            error!("Failed to handle message from user {user_id}: {e:?}");
            bot.send_message(msg.chat.id, "Something went wrong. Please try again.")
                .await?;
        }
    }

    Ok(())
}
