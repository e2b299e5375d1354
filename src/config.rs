//! Configuration loader for the `farmwatch` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional boolean environment variable with a default value.
/// Accepts the same spellings as `FORCE_COLOR`: 1/true/yes and 0/false/no.
macro_rules! parse_env_bool {
    ($var_name:expr, $default:expr) => {
        match env::var($var_name).ok().as_deref() {
            None => $default,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => return Err(anyhow!("Invalid {}: {}", $var_name, other)),
        }
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// TCP port the HTTP server binds on.
    pub http_port: u16,

    /// Minimum seconds between repeated notifications for one open alert.
    pub alert_cooldown_secs: u32,

    /// Auto-resolve active alerts when a NORMAL/WARNING reading arrives.
    pub auto_resolve: bool,

    /// Delivery tries per notification channel before falling back.
    pub notify_max_attempts: u32,

    /// Bound on each outbound notification call, in seconds.
    pub notify_timeout_secs: u32,

    /// How long shutdown waits for in-flight notifications, in seconds.
    pub shutdown_grace_secs: u32,

    /// Optional JSON file overriding the built-in threshold table.
    pub thresholds_file: Option<String>,

    /// SMS gateway endpoint. Unset disables the SMS channel.
    pub sms_gateway_url: Option<String>,

    /// Email gateway endpoint. Unset disables the EMAIL channel.
    pub email_gateway_url: Option<String>,

    /// Always-notified admin phone number.
    pub admin_phone: Option<String>,

    /// Always-notified admin email address.
    pub admin_email: Option<String>,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – listen port (default: 8080)
/// - `ALERT_COOLDOWN_SECS` – notification cooldown per alert (default: 1800)
/// - `AUTO_RESOLVE_ALERTS` – auto-resolve on recovery readings (default: true)
/// - `NOTIFY_MAX_ATTEMPTS` – tries per channel (default: 3)
/// - `NOTIFY_TIMEOUT_SECS` – per-try send timeout (default: 5)
/// - `SHUTDOWN_GRACE_SECS` – drain window at shutdown (default: 10)
/// - `THRESHOLDS_FILE` – JSON threshold overrides (default: built-ins)
/// - `SMS_GATEWAY_URL`, `EMAIL_GATEWAY_URL` – notification gateways
/// - `ADMIN_PHONE`, `ADMIN_EMAIL` – recipients added to every notification
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let http_port = u16::try_from(parse_env_u32!("HTTP_PORT", 8080))
        .map_err(|_| anyhow!("Invalid HTTP_PORT: must fit a TCP port"))?;
    let alert_cooldown_secs = parse_env_u32!("ALERT_COOLDOWN_SECS", 1800);
    let auto_resolve = parse_env_bool!("AUTO_RESOLVE_ALERTS", true);
    let notify_max_attempts = parse_env_u32!("NOTIFY_MAX_ATTEMPTS", 3);
    let notify_timeout_secs = parse_env_u32!("NOTIFY_TIMEOUT_SECS", 5);
    let shutdown_grace_secs = parse_env_u32!("SHUTDOWN_GRACE_SECS", 10);

    Ok(Config {
        db_url,
        db_pool_max,
        http_port,
        alert_cooldown_secs,
        auto_resolve,
        notify_max_attempts,
        notify_timeout_secs,
        shutdown_grace_secs,
        thresholds_file: env::var("THRESHOLDS_FILE").ok(),
        sms_gateway_url: env::var("SMS_GATEWAY_URL").ok(),
        email_gateway_url: env::var("EMAIL_GATEWAY_URL").ok(),
        admin_phone: env::var("ADMIN_PHONE").ok(),
        admin_email: env::var("ADMIN_EMAIL").ok(),
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        // Mask the password in the database URL for security
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        let unset = "(unset)";
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL         : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT            : {}", self.http_port);
        tracing::info!("  ALERT_COOLDOWN_SECS  : {}", self.alert_cooldown_secs);
        tracing::info!("  AUTO_RESOLVE_ALERTS  : {}", self.auto_resolve);
        tracing::info!("  NOTIFY_MAX_ATTEMPTS  : {}", self.notify_max_attempts);
        tracing::info!("  NOTIFY_TIMEOUT_SECS  : {}", self.notify_timeout_secs);
        tracing::info!("  SHUTDOWN_GRACE_SECS  : {}", self.shutdown_grace_secs);
        tracing::info!(
            "  THRESHOLDS_FILE      : {}",
            self.thresholds_file.as_deref().unwrap_or(unset)
        );
        tracing::info!(
            "  SMS_GATEWAY_URL      : {}",
            self.sms_gateway_url.as_deref().unwrap_or(unset)
        );
        tracing::info!(
            "  EMAIL_GATEWAY_URL    : {}",
            self.email_gateway_url.as_deref().unwrap_or(unset)
        );
        tracing::info!(
            "  ADMIN_PHONE          : {}",
            self.admin_phone.as_deref().unwrap_or(unset)
        );
        tracing::info!(
            "  ADMIN_EMAIL          : {}",
            self.admin_email.as_deref().unwrap_or(unset)
        );
    }
}
