// SPDX-License-Identifier: Apache-2.0
use std::fs;

use bulkmail::config::{CampaignConfig, ConfigStore, DEFAULT_IMAP_PORT, DEFAULT_SMTP_PORT};
use bulkmail::error::ConfigError;
use tempfile::TempDir;

#[test]
fn test_first_load_writes_defaults() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(dir.path().join("config").join("campaign.toml"));

    let config = store.load().unwrap();

    assert_eq!(config, CampaignConfig::default());
    assert_eq!(config.smtp_port, DEFAULT_SMTP_PORT);
    assert_eq!(config.imap_port, DEFAULT_IMAP_PORT);
    assert_eq!(config.unsubscribe_domain, "yourdomain.com");
    assert_eq!(config.tracking_url, "https://yourdomain.com/track?id=");
    assert!(store.path().exists());
}

#[test]
fn test_save_overwrites_whole_record() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(dir.path().join("campaign.toml"));

    let config = CampaignConfig {
        smtp_server: "smtp.example.com".into(),
        smtp_port: 2525,
        email: "sender@example.com".into(),
        password: "hunter2".into(),
        subject: "Spring update".into(),
        email_template_html: "<p>Hi {first_name}</p>\n<p>\"quoted\"</p>".into(),
        csv_file_path: "uploads/list.csv".into(),
        ..CampaignConfig::default()
    };
    store.save(&config).unwrap();
    assert_eq!(store.load().unwrap(), config);

    store.save(&CampaignConfig::default()).unwrap();
    assert_eq!(store.load().unwrap(), CampaignConfig::default());
}

#[test]
fn test_missing_keys_take_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("campaign.toml");
    fs::write(&path, "smtp_server = \"mail.example.com\"\nsubject = \"Hi\"\n").unwrap();

    let config = ConfigStore::new(&path).load().unwrap();

    assert_eq!(config.smtp_server, "mail.example.com");
    assert_eq!(config.subject, "Hi");
    assert_eq!(config.smtp_port, DEFAULT_SMTP_PORT);
    assert_eq!(config.email_column_name, "Email");
    assert_eq!(config.first_name_column_name, "First Name");
}

#[test]
fn test_zero_port_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("campaign.toml");
    fs::write(&path, "smtp_port = 0\n").unwrap();

    let result = ConfigStore::new(&path).load();

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_wrong_type_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("campaign.toml");
    fs::write(&path, "smtp_port = \"five\"\n").unwrap();

    let result = ConfigStore::new(&path).load();

    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_unreadable_path_is_an_io_error() {
    let dir = TempDir::new().unwrap();

    // A directory cannot be read as a file
    let result = ConfigStore::new(dir.path()).load();

    assert!(matches!(result, Err(ConfigError::Io { .. })));
}
