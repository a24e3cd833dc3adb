//! Relay module - forwards /chat prompts to the completion API with recent
//! per-(user, chat) context.

pub mod engine;
pub mod history;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use engine::{ChatRelay, CompletionClient, RelayConfig};
pub use history::{HistoryKey, HistoryStore, HistoryWindow};
pub use telegram::TelegramClient;
