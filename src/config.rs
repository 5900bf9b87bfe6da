use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::forms::FormId;

/// Application-level constants
pub const APP_NAME: &str = "Painlog";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Idle window after which an abandoned form is expired: 10 minutes.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// How often the idle reaper scans the state store.
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;

/// Dashboard feed binds to loopback unless told otherwise.
pub const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8087";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "painlog_lib=info,painlog=info,warn"
}

/// Get the application data directory.
/// ~/Painlog/ on all platforms, current directory when there is no home.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default location of the SQLite database.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("painlog.db")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing bot token: set PAINLOG_BOT_TOKEN or pass --token")]
    MissingToken,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Command line flags. Every flag falls back to its environment variable.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "painlog", version, about = "Headache, medication and blood-pressure diary bot")]
pub struct Args {
    /// Telegram bot token.
    #[arg(long, env = "PAINLOG_BOT_TOKEN")]
    pub token: Option<String>,

    /// SQLite database file.
    #[arg(long, env = "PAINLOG_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Address for the dashboard state feed.
    #[arg(long, env = "PAINLOG_DASHBOARD_ADDR")]
    pub dashboard_addr: Option<String>,

    /// Do not start the dashboard state feed.
    #[arg(long)]
    pub no_dashboard: bool,

    /// Telegram id that receives operational notices.
    #[arg(long, env = "PAINLOG_ADMIN_ID")]
    pub admin_id: Option<i64>,

    /// Idle window applied to every form without its own override.
    #[arg(long, env = "PAINLOG_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: Option<u64>,

    #[arg(long, env = "PAINLOG_REAPER_INTERVAL_SECS")]
    pub reaper_interval_secs: Option<u64>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Per-form idle windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleTimeouts {
    default: Duration,
    per_form: HashMap<FormId, Duration>,
}

impl IdleTimeouts {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_form: HashMap::new(),
        }
    }

    pub fn with_override(mut self, form: FormId, timeout: Duration) -> Self {
        self.per_form.insert(form, timeout);
        self
    }

    pub fn for_form(&self, form: FormId) -> Duration {
        self.per_form.get(&form).copied().unwrap_or(self.default)
    }

    /// Window for states that belong to no known form.
    pub fn fallback(&self) -> Duration {
        self.default
    }
}

impl Default for IdleTimeouts {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS))
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub db_path: PathBuf,
    /// `None` disables the dashboard server.
    pub dashboard_addr: Option<SocketAddr>,
    pub admin_id: Option<i64>,
    pub idle_timeouts: IdleTimeouts,
    pub reaper_interval: Duration,
    pub log_json: bool,
}

impl BotConfig {
    /// Resolve flags against the process environment.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve flags against an arbitrary variable lookup.
    ///
    /// Flags already carry their primary env fallback (clap `env`); the lookup
    /// covers the secondary names: `TELEGRAM_BOT_TOKEN` and the per-form
    /// `PAINLOG_IDLE_TIMEOUT_<FORM>_SECS` overrides.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bot_token = args
            .token
            .or_else(|| env("TELEGRAM_BOT_TOKEN"))
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let dashboard_addr = if args.no_dashboard {
            None
        } else {
            let raw = args
                .dashboard_addr
                .unwrap_or_else(|| DEFAULT_DASHBOARD_ADDR.to_string());
            Some(raw.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidValue {
                name: "PAINLOG_DASHBOARD_ADDR".into(),
                value: raw.clone(),
            })?)
        };

        let default_idle = args.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
        if default_idle == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PAINLOG_IDLE_TIMEOUT_SECS".into(),
                value: "0".into(),
            });
        }
        let mut idle_timeouts = IdleTimeouts::new(Duration::from_secs(default_idle));
        for form in FormId::ALL {
            let name = format!("PAINLOG_IDLE_TIMEOUT_{}_SECS", form.env_suffix());
            if let Some(raw) = env(&name) {
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        name: name.clone(),
                        value: raw.clone(),
                    })?;
                idle_timeouts = idle_timeouts.with_override(form, Duration::from_secs(secs));
            }
        }

        let reaper_secs = args
            .reaper_interval_secs
            .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS)
            .max(1);

        Ok(Self {
            bot_token,
            db_path: args.db_path.unwrap_or_else(default_db_path),
            dashboard_addr,
            admin_id: args.admin_id,
            idle_timeouts,
            reaper_interval: Duration::from_secs(reaper_secs),
            log_json: args.log_json,
        })
    }
}
