use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub profile_name: String,
    pub sync: SyncConfig,
    pub send: SendConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    /// Upper bound for the delay between polls after repeated failures.
    pub backoff_max_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            backoff_max_secs: 300,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs.max(self.poll_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfig {
    /// Countdown length of the undo window, in ticks.
    pub undo_ticks: u32,
    pub tick_millis: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            undo_ticks: 15,
            tick_millis: 1000,
        }
    }
}

impl SendConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    pub secondary_suggestions: Vec<String>,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            secondary_suggestions: ["urgent", "vip", "follow-up", "invoice", "feedback"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Environment variable holding the bearer token for the store API.
    pub api_token_env: String,
}

impl RemoteConfig {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("remote.base_url: {err}")))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password_env: String,
    pub from_address: String,
    pub from_name: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 465,
            username: String::new(),
            password_env: "FLOWBOX_SMTP_PASSWORD".to_string(),
            from_address: String::new(),
            from_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub user_id_env: String,
    pub display_name_env: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id_env: "FLOWBOX_USER_ID".to_string(),
            display_name_env: "FLOWBOX_USER_NAME".to_string(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.remote.base_url()?;
        if self.sync.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.send.undo_ticks == 0 || self.send.tick_millis == 0 {
            return Err(ConfigError::Invalid(
                "send.undo_ticks and send.tick_millis must be greater than zero".to_string(),
            ));
        }
        if self.smtp.enabled && (self.smtp.host.is_empty() || self.smtp.from_address.is_empty()) {
            return Err(ConfigError::Invalid(
                "smtp.host and smtp.from_address are required when smtp is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            profile_name: "default".to_string(),
            sync: SyncConfig::default(),
            send: SendConfig::default(),
            taxonomy: TaxonomyConfig::default(),
            remote: RemoteConfig {
                base_url: "http://127.0.0.1:8080/api/".to_string(),
                timeout_secs: 20,
                api_token_env: "FLOWBOX_API_TOKEN".to_string(),
            },
            smtp: SmtpConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}
