//! Telegram Autopilot - Main Entry Point
//!
//! Connects the configured user accounts, dispatches their updates to the
//! automation rules and chat commands, and drains the task queue until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tg_autopilot::automation::{AutomationEvaluator, RuleStore};
use tg_autopilot::commands::CommandHandler;
use tg_autopilot::config::{BotSettings, QueueSettings, RulesFile, TelegramConfig};
use tg_autopilot::events::EventDispatcher;
use tg_autopilot::queue::{TaskExecutor, TaskQueue};
use tg_autopilot::storage::{ActivityLog, JsonStore, Storage};
use tg_autopilot::telegram::{ClientRegistry, TelegramBot, TelegramError};

/// Updates buffered between the account clients and the dispatcher.
const UPDATE_BUFFER: usize = 1024;

/// How long shutdown waits for queued tasks to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Rate-limited Telegram automation for user accounts.
#[derive(Parser, Debug)]
#[command(name = "tg_autopilot")]
#[command(about = "Automate replies, forwards and posts on your Telegram accounts")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to the data file (overrides `DATA_PATH`).
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Import the rules of a JSON rules file before starting.
    #[arg(long)]
    import_rules: Option<PathBuf>,

    /// Generate an example rules file and exit.
    #[arg(long)]
    generate_rules: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if args.generate_rules {
        return generate_example_rules();
    }

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;
    let bot_settings = BotSettings::from_env_with_defaults();
    let queue_settings = QueueSettings::from_env_with_defaults();

    let data_path = args.data.unwrap_or(bot_settings.data_path);
    let store: Arc<dyn Storage> = Arc::new(
        JsonStore::open(&data_path)
            .with_context(|| format!("Failed to open data file {}", data_path.display()))?,
    );

    let interrupted = store
        .fail_interrupted_tasks()
        .context("Failed to recover interrupted tasks")?;
    if interrupted > 0 {
        warn!("Marked {} interrupted task(s) as failed", interrupted);
    }

    let rules = Arc::new(RuleStore::new(Arc::clone(&store)));
    rules.load().await.context("Failed to load rules")?;

    if let Some(path) = &args.import_rules {
        import_rules(&rules, path).await?;
    }

    let clients = Arc::new(ClientRegistry::new());
    let queue = TaskQueue::new(
        TaskExecutor::new(Arc::clone(&clients)),
        Arc::clone(&store),
        queue_settings,
    );
    let evaluator = AutomationEvaluator::new(
        Arc::clone(&rules),
        queue.clone(),
        ActivityLog::new(Arc::clone(&store)),
    );
    let commands = Arc::new(CommandHandler::new(
        bot_settings.command_prefix.clone(),
        queue.clone(),
        Arc::clone(&rules),
        Arc::clone(&store),
        Arc::clone(&clients),
    ));
    let dispatcher =
        Arc::new(EventDispatcher::new(evaluator, queue.clone()).with_commands(commands));

    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
    let mut bots = Vec::with_capacity(tg_config.accounts.len());

    for account in &tg_config.accounts {
        let bot = TelegramBot::connect(&tg_config, account)
            .await
            .context("Failed to connect to Telegram")?;

        if !bot.is_authorized().await.context("Failed to check authorization")? {
            authenticate(&bot, &tg_config).await?;
        }

        let bot = Arc::new(bot);
        dispatcher.register(account).await;
        bot.start_updates(updates_tx.clone());
        clients.insert(account.clone(), bot.clone()).await;
        bots.push(bot);
    }
    drop(updates_tx);

    info!("Starting autopilot for {} account(s)...", bots.len());
    info!("Command prefix: {}", bot_settings.command_prefix);

    let dispatch_task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run(updates_rx).await })
    };

    info!("Bot is running. Use Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = dispatch_task => {
            warn!("All update streams ended, shutting down...");
        }
    }

    queue.close().await;
    if tokio::time::timeout(SHUTDOWN_GRACE, queue.wait_idle())
        .await
        .is_err()
    {
        let status = queue.status().await;
        warn!(
            "Gave up waiting for the queue, {} task(s) still pending",
            status.pending
        );
    }

    for bot in &bots {
        bot.disconnect();
    }

    match tokio::task::spawn_blocking(move || store.flush()).await {
        Ok(Ok(())) => debug!("Data file saved"),
        Ok(Err(e)) => warn!("Failed to save data file: {}", e),
        Err(e) => warn!("Data file save task failed: {}", e),
    }

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Writes an example rules file.
fn generate_example_rules() -> Result<()> {
    let example = RulesFile::example();
    example.save_to_file("rules.example.json")?;

    println!("✓ Example rules written to: rules.example.json");
    println!("\nTo use them:");
    println!("1. Copy rules.example.json to rules.json and edit it");
    println!("2. Check it with: validate_rules --file rules.json");
    println!("3. Create a .env file with TG_API_ID, TG_API_HASH and TG_ACCOUNTS");
    println!("4. Run: tg_autopilot --import-rules rules.json");

    Ok(())
}

/// Validates a rules file and stores all of its rules.
async fn import_rules(rules: &RuleStore, path: &std::path::Path) -> Result<()> {
    let file = RulesFile::load_from_file(path)
        .with_context(|| format!("Failed to load rules file {}", path.display()))?;
    file.validate().context("Rules file validation failed")?;

    let count = file.len();
    for draft in file.rules {
        let rule = rules.create(draft).await.context("Failed to store rule")?;
        debug!("Imported rule {} ({})", rule.id, rule.name);
    }
    info!("Imported {} rule(s) from {}", count, path.display());
    Ok(())
}

/// Handles Telegram authentication for one account.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required for {}", bot.account());

    let token = bot
        .request_login_code(&config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt(format!("Enter the login code for {}", bot.account()))
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => Ok(()),
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
