use config::{Environment, File};
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// How the session authenticates after the connection is established.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Plain LOGIN with username and password.
    Password,
    /// AUTHENTICATE XOAUTH2 with an OAuth2 access token.
    XOAuth2,
}

/// Settings for a single session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Password or OAuth2 access token, depending on `auth`.
    pub secret: String,
    pub auth: AuthMode,
    pub connect_timeout_secs: u64,
    /// Quiet period after which the transport reports an idle notification.
    pub idle_interval_secs: u64,
    /// Bound on the logout wait during graceful close.
    pub close_timeout_secs: u64,
    /// Optional watchdog for the single outstanding command. Off by default;
    /// when set, a command that never gets a response fails the session
    /// instead of stalling it forever.
    pub command_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 993,
            username: String::new(),
            secret: String::new(),
            auth: AuthMode::Password,
            connect_timeout_secs: 30,
            idle_interval_secs: 60,
            close_timeout_secs: 10,
            command_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn new(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut config_builder = config::Config::builder()
            .set_default("host", "localhost")?
            .set_default("port", 993)?
            .set_default("username", "")?
            .set_default("secret", "")?
            .set_default("auth", "password")?
            .set_default("connect_timeout_secs", 30)?
            .set_default("idle_interval_secs", 60)?
            .set_default("close_timeout_secs", 10)?;

        // Add configuration from file
        if let Some(path) = config_path {
            config_builder = config_builder.add_source(File::with_name(path));
        }

        // Add environment variables with prefix
        // e.g. `RUSTYIMAP_HOST=...` would override `host`
        config_builder = config_builder.add_source(
            Environment::with_prefix("RUSTYIMAP").ignore_empty(true),
        );

        // Add direct environment variables for important settings
        // e.g. `IMAP_HOST=...` would override `host`
        let env_vars = [
            ("IMAP_HOST", "host"),
            ("IMAP_PORT", "port"),
            ("IMAP_USER", "username"),
            ("IMAP_PASS", "secret"),
            ("IMAP_AUTH", "auth"),
        ];

        for (env_var, config_path) in &env_vars {
            if let Ok(value) = env::var(env_var) {
                if *env_var == "IMAP_PORT" {
                    if let Ok(port) = value.parse::<u16>() {
                        config_builder = config_builder.set_override(*config_path, port)?;
                    } else {
                        warn!("Invalid port value in {}: {}", env_var, value);
                    }
                } else {
                    config_builder = config_builder.set_override(*config_path, value)?;
                }
            }
        }

        // Build the config and deserialize it into SessionConfig
        config_builder.build()?.try_deserialize()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}
