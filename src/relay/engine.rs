//! Relay engine - forwards prompts plus recent context to the completion API.

use std::future::Future;

use tracing::{info, warn};

use crate::openai::{self, Message, Role};
use crate::relay::history::{HistoryKey, HistoryStore};

/// System persona prepended to every outbound request unless overridden.
const DEFAULT_PERSONA: &str =
    "You are a helpful assistant embedded in a Telegram group. Answer concisely and clearly.";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub persona: String,
    pub model: String,
    pub temperature: f32,
    /// Turns kept per (user, chat) conversation.
    pub max_history: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_history: 5,
        }
    }
}

/// Seam for the completion API so tests can script the backend.
pub trait CompletionClient: Send + Sync {
    fn complete(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> impl Future<Output = Result<String, openai::Error>> + Send;
}

impl CompletionClient for openai::Client {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, openai::Error> {
        self.chat(model, messages, temperature).await
    }
}

/// The relay engine.
pub struct ChatRelay<C> {
    config: RelayConfig,
    history: HistoryStore,
    client: C,
}

impl<C: CompletionClient> ChatRelay<C> {
    pub fn new(config: RelayConfig, client: C) -> Self {
        let history = HistoryStore::new(config.max_history);
        Self {
            config,
            history,
            client,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Relay one `/chat` command: record the user turn, send the persona
    /// plus the conversation window to the completion API, record the reply.
    ///
    /// The window lock is held across the whole sequence so concurrent
    /// commands on the same (user, chat) cannot interleave their turns.
    /// On failure the user turn stays recorded; only the assistant turn
    /// requires a successful call.
    pub async fn handle_command(
        &self,
        user_id: i64,
        chat_id: i64,
        prompt: &str,
    ) -> Result<String, openai::Error> {
        let key = HistoryKey { user_id, chat_id };
        let window = self.history.get_or_create(key);
        let mut window = window.lock().await;

        window.push(Message {
            role: Role::User,
            content: prompt.to_string(),
        });

        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.push(Message {
            role: Role::System,
            content: self.config.persona.clone(),
        });
        messages.extend(window.snapshot());

        info!(
            "Relaying prompt from {user_id} in chat {chat_id} ({} turn(s) of context)",
            window.len()
        );

        let reply = match self
            .client
            .complete(&self.config.model, &messages, self.config.temperature)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Completion failed for {user_id} in chat {chat_id}: {e}");
                return Err(e);
            }
        };

        window.push(Message {
            role: Role::Assistant,
            content: reply.clone(),
        });

        Ok(reply)
    }
}
