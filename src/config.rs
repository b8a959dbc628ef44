// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::error::ConfigError;

/// Environment variable overriding where the configuration record lives
pub const CONFIG_PATH_ENV: &str = "BULKMAIL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/campaign.toml";

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_SUBJECT: &str = "Your Subject Here";

/// Every setting the campaign tool recognizes.
///
/// Missing keys in the persisted record take the values from [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    /// Stored for the settings page; nothing reads mail yet
    pub imap_server: String,
    pub imap_port: u16,
    /// SMTP account, also used as the sender address
    pub email: String,
    pub password: String,
    pub sender_name: String,
    pub subject: String,
    /// HTML body; `{first_name}` is replaced per recipient
    pub email_template_html: String,
    pub csv_file_path: String,
    pub email_column_name: String,
    pub first_name_column_name: String,
    pub unsubscribe_domain: String,
    /// Prefix of the tracking pixel URL, the tracking id is appended verbatim
    pub tracking_url: String,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: DEFAULT_SMTP_PORT,
            imap_server: String::new(),
            imap_port: DEFAULT_IMAP_PORT,
            email: String::new(),
            password: String::new(),
            sender_name: "Campaign".to_string(),
            subject: String::new(),
            email_template_html: String::new(),
            csv_file_path: String::new(),
            email_column_name: "Email".to_string(),
            first_name_column_name: "First Name".to_string(),
            unsubscribe_domain: "yourdomain.com".to_string(),
            tracking_url: "https://yourdomain.com/track?id=".to_string(),
        }
    }
}

impl CampaignConfig {
    /// Checks the values serde cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp_port == 0 {
            return Err(ConfigError::Invalid("smtp_port must be non-zero".into()));
        }
        if self.imap_port == 0 {
            return Err(ConfigError::Invalid("imap_port must be non-zero".into()));
        }
        if self.email_column_name.trim().is_empty() {
            return Err(ConfigError::Invalid("email_column_name must not be blank".into()));
        }
        if self.first_name_column_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "first_name_column_name must not be blank".into(),
            ));
        }
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }

    pub fn subject_or_default(&self) -> &str {
        if self.subject.trim().is_empty() {
            DEFAULT_SUBJECT
        } else {
            &self.subject
        }
    }
}

/// Persists [`CampaignConfig`] as a TOML file.
///
/// Saves overwrite the whole record. There is no locking, concurrent
/// load/save from different requests may interleave.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Uses `BULKMAIL_CONFIG` if set, otherwise `config/campaign.toml`
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the record, writing the defaults first if none exists yet
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<CampaignConfig, ConfigError> {
        let config = match fs::read_to_string(&self.path) {
            Ok(text) => toml::from_str::<CampaignConfig>(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config file found, writing defaults");
                let config = CampaignConfig::default();
                self.save(&config)?;
                config
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        config.validate()?;
        Ok(config)
    }

    #[instrument(skip(self, config), fields(path = %self.path.display()))]
    pub fn save(&self, config: &CampaignConfig) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(config)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&self.path, text).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!("Configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_subject_falls_back() {
        let mut config = CampaignConfig::default();
        assert_eq!(config.subject_or_default(), DEFAULT_SUBJECT);

        config.subject = "Hello".into();
        assert_eq!(config.subject_or_default(), "Hello");
    }

    #[test]
    fn credentials_need_both_fields() {
        let mut config = CampaignConfig::default();
        assert!(!config.has_credentials());

        config.email = "sender@example.com".into();
        assert!(!config.has_credentials());

        config.password = "secret".into();
        assert!(config.has_credentials());
    }

    #[test]
    fn validate_rejects_blank_columns() {
        let config = CampaignConfig {
            email_column_name: "  ".into(),
            ..CampaignConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
