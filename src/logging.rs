// SPDX-License-Identifier: Apache-2.0
use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// `json` selects Bunyan JSON lines for the log file, anything else plain text
pub const LOG_FORMAT_ENV: &str = "BULKMAIL_LOG_FORMAT";
/// Path of the append-only log file
pub const LOG_FILE_ENV: &str = "BULKMAIL_LOG_FILE";
pub const DEFAULT_LOG_FILE: &str = "email_log.txt";

fn env_filter(name: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info,actix_web=info", name)))
}

fn install<S>(subscriber: S) -> io::Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    // Skip setting LogTracer if it's already been set
    let _ = LogTracer::init();
    set_global_default(subscriber).map_err(io::Error::other)
}

/// Console output plus an append-only log file.
///
/// Every line in the file carries a timestamp, the level and the message.
/// With `json` the file gets Bunyan records instead of plain lines.
pub fn init_tracing(name: &str, log_file: &Path, json: bool) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    let console = fmt::layer().with_target(true).with_level(true);

    if json {
        let subscriber = Registry::default()
            .with(env_filter(name))
            .with(console)
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new(name.into(), Mutex::new(file)));
        install(subscriber)?;
    } else {
        let subscriber = Registry::default()
            .with(env_filter(name))
            .with(console)
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));
        install(subscriber)?;
    }

    tracing::info!(log_file = %log_file.display(), json, "Tracing initialized");
    Ok(())
}

/// Reads `BULKMAIL_LOG_FILE` and `BULKMAIL_LOG_FORMAT` and calls [`init_tracing`]
pub fn init_from_env(name: &str) -> io::Result<()> {
    let log_file = env::var(LOG_FILE_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let json = env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    init_tracing(name, Path::new(&log_file), json)
}
