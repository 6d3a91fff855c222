//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so an embedding application can start the
//! sync engine without any configuration.

use std::path::PathBuf;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Location of the SQLite database.
    /// Env: `PARLEY_DB_PATH`
    /// Default: `None` (platform data directory, see `parley_store::database::default_path`).
    pub database_path: Option<PathBuf>,

    /// Whether an outgoing message counts as sent as soon as its backend
    /// accepted it without returning a server id. Realms can override this.
    /// Env: `PARLEY_NOTIFY_SENT_IMMEDIATELY` (true/false)
    /// Default: `true`
    pub notify_sent_immediately: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            notify_sent_immediately: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PARLEY_DB_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("PARLEY_NOTIFY_SENT_IMMEDIATELY") {
            match parse_flag(&val) {
                Some(flag) => config.notify_sent_immediately = flag,
                None => tracing::warn!(
                    value = %val,
                    "Invalid PARLEY_NOTIFY_SENT_IMMEDIATELY, using default"
                ),
            }
        }

        // RUST_LOG is read by the EnvFilter in `init_tracing`.

        config
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
