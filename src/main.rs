mod config;
mod openai;
mod relay;

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use relay::{ChatRelay, RelayConfig, TelegramClient};

struct BotState {
    relay: ChatRelay<openai::Client>,
    telegram: TelegramClient,
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "ask the assistant; recent turns are kept as context.")]
    Chat(String),
    #[command(description = "show this help.")]
    Help,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "teleprompt.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("teleprompt.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting teleprompt...");
    info!("Loaded config from {config_path}");
    info!(
        "Model: {}, temperature: {}, history window: {}",
        config.model, config.temperature, config.max_history
    );

    let bot = Bot::new(&config.telegram_bot_token);

    let mut relay_config = RelayConfig {
        model: config.model.clone(),
        temperature: config.temperature,
        max_history: config.max_history,
        ..RelayConfig::default()
    };
    if let Some(persona) = config.persona.clone() {
        relay_config.persona = persona;
    }

    let state = Arc::new(BotState {
        relay: ChatRelay::new(relay_config, openai::Client::new(config.openai_api_key.clone())),
        telegram: TelegramClient::new(bot.clone()),
    });

    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handle_command);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    match cmd {
        Command::Help => {
            state
                .telegram
                .send_message(msg.chat.id.0, &Command::descriptions().to_string(), None)
                .await
                .ok();
        }
        Command::Chat(prompt) => {
            let user = match msg.from {
                Some(ref u) => u,
                None => return Ok(()),
            };
            let chat_id = msg.chat.id.0;
            let message_id = msg.id.0 as i64;

            let prompt = prompt.trim();
            if prompt.is_empty() {
                state
                    .telegram
                    .send_message(chat_id, "Usage: /chat <prompt>", Some(message_id))
                    .await
                    .ok();
                return Ok(());
            }

            let username = user.username.as_deref().unwrap_or(&user.first_name);
            let prompt_preview: String = prompt.chars().take(100).collect();
            info!("💬 /chat from {username} ({}) in chat {chat_id}: \"{prompt_preview}\"", user.id);

            let text = match state
                .relay
                .handle_command(user.id.0 as i64, chat_id, prompt)
                .await
            {
                Ok(reply) => reply,
                Err(e) => format!("⚠️ Failed to communicate with OpenAI API: {e}"),
            };

            if let Err(e) = state.telegram.send_message(chat_id, &text, Some(message_id)).await {
                warn!("Reply delivery failed: {e}");
            }
        }
    }

    Ok(())
}
