pub mod api; // Dashboard side channel: snapshot + live state feed
pub mod bot;
pub mod config;
pub mod core_state;
pub mod db;
pub mod diary;
pub mod forms;
pub mod models;
pub mod scheduler;
pub mod states;
pub mod transport;

use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, BotConfig, ConfigError};
use crate::core_state::{CoreError, CoreState};
use crate::db::DatabaseError;
use crate::scheduler::SchedulerContext;
use crate::transport::{TelegramClient, TransportError};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Startup failed: {0}")]
    Core(#[from] CoreError),

    #[error("Chat API rejected the bot token: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn run() {
    // A missing .env file is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let result = BotConfig::from_args(args)
        .map_err(StartupError::from)
        .and_then(|config| {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(serve(config))
        });
    if let Err(e) = result {
        tracing::error!(error = %e, "Painlog stopped");
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wire everything up and poll until Ctrl-C.
pub async fn serve(config: BotConfig) -> Result<(), StartupError> {
    let conn = db::open_database(&config.db_path)?;
    tracing::info!(path = %config.db_path.display(), "Database ready");

    let client = TelegramClient::new(&config.bot_token);
    let bot_name = client.get_me().await?;
    tracing::info!(bot = %bot_name, "Chat API token accepted");

    let core = Arc::new(CoreState::new(conn, Arc::new(client.clone()))?);

    let dashboard = match config.dashboard_addr {
        Some(addr) => Some(api::start_dashboard_server(core.clone(), addr).await?),
        None => {
            tracing::info!("Dashboard disabled");
            None
        }
    };

    let scheduler = scheduler::start_scheduler(SchedulerContext {
        engine: core.engine.clone(),
        conn: core.conn.clone(),
        transport: core.transport.clone(),
        idle_timeouts: config.idle_timeouts.clone(),
        reaper_interval: config.reaper_interval,
        admin_id: config.admin_id,
    });

    let dispatcher = bot::Dispatcher::new(core.clone());
    dispatcher
        .run_polling(&client, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await;

    scheduler.join().await;
    drop(dashboard);
    tracing::info!("Painlog stopped cleanly");
    Ok(())
}
