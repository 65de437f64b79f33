use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use mahzen_common::{APP_NAME, MahzenConfig, logging};
use mahzen_gateway::{InboundMessage, MahzenGateway};
use mahzen_memory::{HistoryLimits, HistoryStore};
use mahzen_model::{GeminiClient, LanguageModel};
use mahzen_prefs::PreferenceStore;
use mahzen_telegram::TelegramGateway;
use tracing::{error, info, warn};

const TELEGRAM_TIMEOUT_MS: u64 = 15_000;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "mahzen", about = "Mahzen Telegram bot", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate local setup and generate default config if missing.
    Doctor,
    /// Long-poll Telegram and answer messages until interrupted.
    Run,
    /// Read-only preference store inspection. Bulk clears go through `/tercihsifirla`.
    Prefs {
        #[command(subcommand)]
        command: PrefsCommand,
    },
    /// Conversation history operations.
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },
    /// Telegram Bot API commands.
    Telegram {
        #[command(subcommand)]
        command: TelegramCommand,
    },
    /// Language model configuration.
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PrefsCommand {
    /// Show one user's record in one chat.
    Show {
        #[arg(long, allow_negative_numbers = true)]
        scope: i64,
        #[arg(long, allow_negative_numbers = true)]
        principal: i64,
    },
    /// Count records, stored preferences and active consents.
    Stats,
}

#[derive(Debug, Subcommand)]
enum MemoryCommand {
    /// Show message counts.
    Stats,
    /// Backup the history DB to a file.
    Backup { path: PathBuf },
    /// Restore the history DB from a backup file.
    Restore { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum TelegramCommand {
    /// Validate the configured bot token with getMe.
    Status,
    /// Send a message to a chat.
    Send {
        #[arg(allow_negative_numbers = true)]
        chat_id: i64,
        text: String,
    },
}

#[derive(Debug, Subcommand)]
enum ModelCommand {
    /// Show the configured model id and endpoint.
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Doctor) => doctor(),
        Some(Command::Run) => run(),
        Some(Command::Prefs { command }) => prefs(command),
        Some(Command::Memory { command }) => memory(command),
        Some(Command::Telegram { command }) => telegram(command),
        Some(Command::Model { command }) => model(command),
        None => {
            println!("{APP_NAME} CLI ready.");
            println!("Run `mahzen doctor` to generate and validate local config.");
            Ok(())
        }
    }
}

fn load_initialized_config() -> Result<MahzenConfig> {
    let (config, _, _) = MahzenConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init(&config.log_level);
    Ok(config)
}

fn doctor() -> Result<()> {
    let (config, path, created) = MahzenConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init(&config.log_level);

    println!("{APP_NAME} doctor: OK");
    println!("config: {}", path.display());
    println!("data_dir: {}", config.data_dir.display());
    println!("created_config: {created}");
    println!("telegram_token: {}", configured(config.telegram_token().is_some()));
    println!("model_api_key: {}", configured(config.model_api_key().is_some()));
    println!("preferences: {}", config.preferences_path().display());
    println!("history: {}", config.history_db_path().display());
    println!("memory_enabled: {}", config.memory.enabled);
    println!("allowed_groups: {}", config.chat.allowed_groups.len());
    println!("admins: {}", config.chat.admin_user_ids.len());

    let store = PreferenceStore::open(config.preferences_path());
    if store.recovered_from_corruption() {
        println!("preferences_status: recovered from unreadable file");
    }
    Ok(())
}

fn run() -> Result<()> {
    let (config, _, _) = MahzenConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init_with_file(&config.log_level, &config.log_file_path());

    let telegram = Arc::new(telegram_gateway(&config)?);
    let me = telegram.get_me().context("telegram getMe failed")?;
    let bot_username = me
        .username
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| config.telegram.bot_username.clone());
    let model: Arc<dyn LanguageModel> = Arc::new(model_client(&config)?);
    let poll_timeout = config.telegram.poll_timeout_secs;
    let gateway = Arc::new(MahzenGateway::new(config, model, bot_username));
    info!(
        bot_id = me.id,
        bot_username = gateway.bot_username(),
        "bot started"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    // The blocking HTTP clients must be dropped outside the runtime, so main keeps its handles.
    let result = runtime.block_on(poll_updates(
        Arc::clone(&telegram),
        Arc::clone(&gateway),
        me.id,
        poll_timeout,
    ));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn poll_updates(
    telegram: Arc<TelegramGateway>,
    gateway: Arc<MahzenGateway>,
    bot_id: i64,
    timeout_secs: u64,
) -> Result<()> {
    let mut offset = None;
    loop {
        let poller = Arc::clone(&telegram);
        let batch = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("shutdown signal received");
                return Ok(());
            }
            batch = tokio::task::spawn_blocking(move || poller.get_updates(offset, timeout_secs)) => batch?,
        };
        let updates = match batch {
            Ok(updates) => updates,
            Err(err) => {
                error!("getUpdates failed: {err:#}");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        let mut workers = Vec::with_capacity(updates.len());
        for update in updates {
            offset = Some(update.update_id + 1);
            let Some(message) = update
                .message
                .as_ref()
                .and_then(|message| InboundMessage::from_telegram(message, bot_id))
            else {
                continue;
            };
            let gateway = Arc::clone(&gateway);
            let sink = Arc::clone(&telegram);
            workers.push(tokio::task::spawn_blocking(move || {
                gateway.process(&message, sink.as_ref());
            }));
        }
        for worker in workers {
            if let Err(err) = worker.await {
                error!("update worker panicked: {err}");
            }
        }
    }
}

fn prefs(command: PrefsCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let store = PreferenceStore::open(config.preferences_path());
    if store.recovered_from_corruption() {
        warn!("preference file was unreadable and has been reset");
    }

    match command {
        PrefsCommand::Show { scope, principal } => match store.get(scope, principal) {
            Some(record) => {
                println!("display_name: {}", record.display_name);
                println!("consent_given: {}", record.consent_given);
                println!("last_updated: {}", record.last_updated);
                println!("created_by: {}", record.created_by);
                println!("preferences: {}", record.preferences.len());
                for (pref_type, value) in &record.preferences {
                    println!("- {pref_type}: {value}");
                }
            }
            None => println!("record: none"),
        },
        PrefsCommand::Stats => {
            let stats = store.stats();
            println!("records: {}", stats.total_records);
            println!("preferences: {}", stats.total_preferences);
            println!("consented: {}", stats.consented_records);
        }
    }
    Ok(())
}

fn memory(command: MemoryCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let limits = HistoryLimits {
        group_messages: config.memory.max_group_messages,
        private_messages: config.memory.max_private_messages,
    };
    let mut store = HistoryStore::open(&config.history_db_path(), limits)?;

    match command {
        MemoryCommand::Stats => {
            let stats = store.stats()?;
            println!("group_chats: {}", stats.group_chats);
            println!("group_messages: {}", stats.group_messages);
            println!("private_users: {}", stats.private_users);
            println!("private_messages: {}", stats.private_messages);
        }
        MemoryCommand::Backup { path } => {
            store.backup_to(&path)?;
            println!("backup_created: {}", path.display());
        }
        MemoryCommand::Restore { path } => {
            store.restore_from(&path)?;
            println!("restore_applied: {}", path.display());
        }
    }
    Ok(())
}

fn telegram(command: TelegramCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let gateway = telegram_gateway(&config)?;

    match command {
        TelegramCommand::Status => {
            let me = gateway.get_me()?;
            println!("telegram_status: ok");
            println!("bot_id: {}", me.id);
            println!("bot_username: {}", me.display_name());
        }
        TelegramCommand::Send { chat_id, text } => {
            let sent = gateway.send_message(chat_id, &text, None)?;
            println!("send_status: ok");
            println!("message_id: {}", sent.message_id);
            println!("chat_id: {}", sent.chat.id);
        }
    }
    Ok(())
}

fn model(command: ModelCommand) -> Result<()> {
    let config = load_initialized_config()?;

    match command {
        ModelCommand::Show => {
            println!("model: {}", config.model.model_id);
            println!(
                "endpoint: {}",
                config.model.endpoint.as_deref().unwrap_or("<none>")
            );
            println!(
                "api_key_env: {}",
                config.model.api_key_env.as_deref().unwrap_or("<none>")
            );
            println!("api_key: {}", configured(config.model_api_key().is_some()));
            println!("timeout_ms: {}", config.model.timeout_ms);
        }
    }
    Ok(())
}

fn telegram_gateway(config: &MahzenConfig) -> Result<TelegramGateway> {
    let token = config.telegram_token().ok_or_else(|| {
        anyhow!("telegram token missing: set TELEGRAM_BOT_TOKEN or config.telegram.token")
    })?;
    TelegramGateway::with_api_base(&token, TELEGRAM_TIMEOUT_MS, &config.telegram.api_base)
}

fn model_client(config: &MahzenConfig) -> Result<GeminiClient> {
    let endpoint = config
        .model
        .endpoint
        .as_deref()
        .ok_or_else(|| anyhow!("model endpoint missing: set config.model.endpoint"))?;
    let api_key = config.model_api_key().ok_or_else(|| {
        anyhow!(
            "model api key missing: set {}",
            config.model.api_key_env.as_deref().unwrap_or("config.model.api_key_env")
        )
    })?;
    GeminiClient::new(
        endpoint,
        &config.model.model_id,
        &api_key,
        config.model.timeout_ms,
    )
}

fn configured(present: bool) -> &'static str {
    if present { "configured" } else { "missing" }
}
