//! Configuration, read from the environment.
//!
//! Numeric settings that fail to parse fall back to their defaults, matching
//! how operators typically leave half-filled `.env` files around. Only the
//! rule book can abort startup.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::delivery::DeliveryConfig;
use crate::delivery::queue::{DEFAULT_MAX_PER_MINUTE, DEFAULT_MIN_DELAY_MS};
use crate::error::ConfigError;
use crate::pipeline::{DEFAULT_HANDOFF_TEXT, HandoffSettings};
use crate::triage::RuleBook;

pub const DEFAULT_PORT: u16 = 3333;
pub const DEFAULT_PORT_RETRY_ATTEMPTS: u16 = 15;
pub const DEFAULT_BOT_NAME: &str = "Bot";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:3001";

/// Store file name inside the data directory.
pub const DB_FILE_NAME: &str = "wadesk.db";

/// Process-wide settings.
#[derive(Debug)]
pub struct DeskConfig {
    pub port: u16,
    /// Successive ports tried when the preferred one is taken.
    pub port_retry_attempts: u16,
    pub admin_token: Option<SecretString>,
    pub bot_name: String,
    pub data_dir: PathBuf,
    /// Daily-rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
    pub delivery: DeliveryConfig,
    /// Digit strings operator sends are limited to; empty allows all.
    pub allowlist: Vec<String>,
    pub handoff: HandoffSettings,
    pub bridge_url: String,
    pub triage_rules: Option<PathBuf>,
}

impl DeskConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());

        let port = number("PORT")
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PORT);

        let port_retry_attempts = number("PORT_RETRY_ATTEMPTS")
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(DEFAULT_PORT_RETRY_ATTEMPTS)
            .max(1);

        let delivery = DeliveryConfig::from_millis(
            number("MIN_DELAY_MS").unwrap_or(DEFAULT_MIN_DELAY_MS),
            number("MAX_DELAY_MS"),
            number("MAX_PER_MINUTE")
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_MAX_PER_MINUTE),
        );

        let allowlist = get("ALLOWLIST_SEND")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            port,
            port_retry_attempts,
            admin_token: get("ADMIN_TOKEN").map(SecretString::from),
            bot_name: get("BOT_NAME").unwrap_or_else(|| DEFAULT_BOT_NAME.to_string()),
            data_dir: get("WADESK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            log_dir: get("WADESK_LOG_DIR").map(PathBuf::from),
            delivery,
            allowlist,
            handoff: HandoffSettings {
                supervisor: get("HUMAN_JID"),
                ack_text: get("HUMAN_FALLBACK_TEXT")
                    .unwrap_or_else(|| DEFAULT_HANDOFF_TEXT.to_string()),
            },
            bridge_url: get("WA_BRIDGE_URL").unwrap_or_else(|| DEFAULT_BRIDGE_URL.to_string()),
            triage_rules: get("TRIAGE_RULES").map(PathBuf::from),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    /// The configured rule book, or the built-in one, with the bot name applied.
    pub fn load_rule_book(&self) -> Result<RuleBook, ConfigError> {
        let book = match &self.triage_rules {
            Some(path) => RuleBook::load(path)?,
            None => RuleBook::builtin(),
        };
        Ok(book.with_bot_name(&self.bot_name))
    }
}
