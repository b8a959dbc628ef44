// SPDX-License-Identifier: Apache-2.0
use actix_session::{SessionMiddleware, storage::CookieSessionStore};
use actix_web::cookie::{Key, SameSite};
use actix_web::{App, HttpServer, web};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

use bulkmail::app::{AppState, configure, upload_dir_from_env};
use bulkmail::campaign::CampaignRunner;
use bulkmail::config::ConfigStore;
use bulkmail::dispatcher::SmtpDispatcher;
use bulkmail::logging;

const SESSION_KEY_ENV: &str = "BULKMAIL_SESSION_KEY";
const BIND_ENV: &str = "BULKMAIL_BIND";
const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// Get session key from environment or generate a fresh one
fn get_session_key() -> Key {
    match std::env::var(SESSION_KEY_ENV) {
        Ok(key) => Key::try_from(key.as_bytes()).unwrap_or_else(|e| {
            warn!(error = %e, "Session key too short (needs 64 bytes), generating a random one");
            Key::generate()
        }),
        Err(_) => {
            warn!("No session key set in environment. Sessions will not survive a restart.");
            Key::generate()
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    logging::init_from_env("bulkmail")?;

    let store = ConfigStore::from_env();
    let upload_dir = upload_dir_from_env();
    std::fs::create_dir_all(&upload_dir)?;

    // Write defaults on first start so the settings page has a file to edit
    if let Err(e) = store.load() {
        warn!(error = %e, path = %store.path().display(), "Configuration could not be loaded");
    }

    let runner = Arc::new(CampaignRunner::new(
        store.clone(),
        &upload_dir,
        Arc::new(SmtpDispatcher),
    ));
    let state = web::Data::new(AppState {
        store,
        runner,
        upload_dir,
    });

    let session_key = get_session_key();
    let bind = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    info!(bind = %bind, "Starting bulkmail dashboard");

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_secure(false)
                    .cookie_http_only(true)
                    .cookie_same_site(SameSite::Lax)
                    .build(),
            )
            .app_data(state.clone())
            .configure(configure)
    })
    .bind(bind)?
    .client_request_timeout(Duration::from_secs(60))
    .workers(4)
    .run()
    .await
}
