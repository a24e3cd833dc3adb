//! Outbound Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};
use tracing::warn;

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send `text` to a chat, splitting it into multiple messages past the
    /// length limit. Returns the id of the last message sent.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, String> {
        let chat_id = ChatId(chat_id);
        let mut last_id = 0;

        for (i, chunk) in split_message(text, MAX_MESSAGE_LENGTH).into_iter().enumerate() {
            let mut request = self.bot.send_message(chat_id, chunk);

            // Only the first chunk quotes the original message.
            if i == 0
                && let Some(msg_id) = reply_to_message_id
            {
                let reply_params = ReplyParameters::new(MessageId(msg_id as i32));
                request = request.reply_parameters(reply_params);
            }

            last_id = request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })?;
        }

        Ok(last_id)
    }
}

/// Split text into chunks of at most `max_len` bytes, never inside a char.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let mut end = max_len;
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk.to_string());
        rest = tail;
    }
    chunks.push(rest.to_string());
    chunks
}
