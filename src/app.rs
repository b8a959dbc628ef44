// SPDX-License-Identifier: Apache-2.0
use actix_multipart::Multipart;
use actix_session::Session;
use actix_web::http::header;
use actix_web::{Error, HttpResponse, Responder, web};
use askama::Template;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::campaign::{CampaignRunner, CampaignStatus};
use crate::config::{CampaignConfig, ConfigStore};
use crate::error::{CampaignError, ConfigError};

/// Directory receiving uploaded CSV files and the cleaned list
pub const UPLOAD_DIR_ENV: &str = "BULKMAIL_UPLOAD_DIR";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

const FLASH_KEY: &str = "_flashes";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shared state handed to every handler
pub struct AppState {
    pub store: ConfigStore,
    pub runner: Arc<CampaignRunner>,
    pub upload_dir: PathBuf,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    flashes: Vec<String>,
    status: &'a CampaignStatus,
    start_time: String,
    end_time: String,
    config: &'a CampaignConfig,
}

#[derive(Template)]
#[template(path = "upload.html")]
struct UploadTemplate {
    flashes: Vec<String>,
}

#[derive(Template)]
#[template(path = "config.html")]
struct ConfigTemplate<'a> {
    flashes: Vec<String>,
    config: &'a CampaignConfig,
}

/// Fields of the settings form; absent fields keep their stored value
#[derive(Debug, Default, Deserialize)]
pub struct ConfigForm {
    pub smtp_server: Option<String>,
    pub smtp_port: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    pub email_template_html: Option<String>,
    pub email_column_name: Option<String>,
    pub first_name_column_name: Option<String>,
    pub unsubscribe_domain: Option<String>,
    pub tracking_url: Option<String>,
}

fn parse_port(field: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} must be a port number, got '{}'", field, value)))
}

impl ConfigForm {
    /// Overwrites every provided field, then validates the result
    pub fn apply(self, config: &mut CampaignConfig) -> Result<(), ConfigError> {
        if let Some(port) = self.smtp_port {
            config.smtp_port = parse_port("smtp_port", &port)?;
        }
        if let Some(port) = self.imap_port {
            config.imap_port = parse_port("imap_port", &port)?;
        }

        let text_fields = [
            (self.smtp_server, &mut config.smtp_server),
            (self.imap_server, &mut config.imap_server),
            (self.email, &mut config.email),
            (self.password, &mut config.password),
            (self.sender_name, &mut config.sender_name),
            (self.subject, &mut config.subject),
            (self.email_template_html, &mut config.email_template_html),
            (self.email_column_name, &mut config.email_column_name),
            (self.first_name_column_name, &mut config.first_name_column_name),
            (self.unsubscribe_domain, &mut config.unsubscribe_domain),
            (self.tracking_url, &mut config.tracking_url),
        ];
        for (value, slot) in text_fields {
            if let Some(value) = value {
                *slot = value;
            }
        }

        config.validate()
    }
}

fn flash(session: &Session, message: impl Into<String>) {
    let mut flashes = session
        .get::<Vec<String>>(FLASH_KEY)
        .ok()
        .flatten()
        .unwrap_or_default();
    flashes.push(message.into());
    if let Err(e) = session.insert(FLASH_KEY, flashes) {
        warn!(error = %e, "Failed to store flash message");
    }
}

fn take_flashes(session: &Session) -> Vec<String> {
    let flashes = session
        .get::<Vec<String>>(FLASH_KEY)
        .ok()
        .flatten()
        .unwrap_or_default();
    session.remove(FLASH_KEY);
    flashes
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, location))
        .finish()
}

fn render<T: Template>(template: &T) -> HttpResponse {
    match template.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(body),
        Err(e) => {
            error!(error = %e, "Failed to render template");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Loads the config for display, falling back to defaults with a notice
fn load_or_default(store: &ConfigStore, session: &Session) -> CampaignConfig {
    store.load().unwrap_or_else(|e| {
        error!(error = %e, "Failed to load configuration");
        flash(session, format!("Could not load configuration: {}", e));
        CampaignConfig::default()
    })
}

/// Reduces a client-supplied file name to its last path component
fn sanitize_filename(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json("Bulkmail is running")
}

/// Dashboard with campaign progress and the active settings
async fn index(state: web::Data<AppState>, session: Session) -> HttpResponse {
    let status = state.runner.status().snapshot();
    let config = load_or_default(&state.store, &session);

    render(&IndexTemplate {
        flashes: take_flashes(&session),
        start_time: format_time(status.start_time),
        end_time: format_time(status.end_time),
        status: &status,
        config: &config,
    })
}

/// JSON snapshot of the campaign status for polling
async fn status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.runner.status().snapshot())
}

async fn upload_form(session: Session) -> HttpResponse {
    render(&UploadTemplate {
        flashes: take_flashes(&session),
    })
}

/// Stores an uploaded CSV and points the configuration at it
#[instrument(skip_all)]
async fn upload(
    state: web::Data<AppState>,
    session: Session,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let mut saw_file_part = false;
    let mut saved: Option<PathBuf> = None;

    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some("file") {
            while field.try_next().await?.is_some() {}
            continue;
        }
        saw_file_part = true;

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .and_then(sanitize_filename);

        let mut contents = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            contents.extend_from_slice(&chunk);
        }

        if let Some(filename) = filename {
            let dir = state.upload_dir.clone();
            let path = dir.join(filename);
            let target = path.clone();
            web::block(move || {
                std::fs::create_dir_all(&dir)?;
                std::fs::write(target, contents)
            })
                .await?
                .map_err(actix_web::error::ErrorInternalServerError)?;
            saved = Some(path);
        }
    }

    let Some(path) = saved else {
        let message = if saw_file_part {
            "No file selected"
        } else {
            "No file part in the request"
        };
        flash(&session, message);
        return Ok(redirect("/upload"));
    };
    info!(path = %path.display(), "CSV uploaded");

    let result = state.store.load().and_then(|mut config| {
        config.csv_file_path = path.to_string_lossy().into_owned();
        state.store.save(&config)
    });
    match result {
        Ok(()) => flash(&session, "CSV file uploaded and configuration updated!"),
        Err(e) => {
            error!(error = %e, "Failed to update configuration after upload");
            flash(&session, format!("CSV uploaded but configuration update failed: {}", e));
        }
    }
    Ok(redirect("/"))
}

/// Starts a campaign in the background
async fn start_campaign(state: web::Data<AppState>, session: Session) -> HttpResponse {
    match state.runner.start() {
        Ok(_handle) => {
            info!("Campaign started from dashboard");
            flash(&session, "Campaign started! Check dashboard for status.");
        }
        Err(CampaignError::AlreadyRunning) => {
            flash(&session, "A campaign is already running. Wait for it to finish.");
        }
        Err(e) => flash(&session, format!("Failed to start campaign: {}", e)),
    }
    redirect("/")
}

async fn config_form(state: web::Data<AppState>, session: Session) -> HttpResponse {
    let config = load_or_default(&state.store, &session);
    render(&ConfigTemplate {
        flashes: take_flashes(&session),
        config: &config,
    })
}

/// Applies the settings form and saves the whole record
async fn update_config(
    state: web::Data<AppState>,
    session: Session,
    form: web::Form<ConfigForm>,
) -> HttpResponse {
    let mut config = load_or_default(&state.store, &session);

    let result = form
        .into_inner()
        .apply(&mut config)
        .and_then(|()| state.store.save(&config));

    match result {
        Ok(()) => {
            flash(&session, "Configuration updated successfully!");
            redirect("/")
        }
        Err(e) => {
            warn!(error = %e, "Rejected configuration update");
            flash(&session, format!("Configuration not saved: {}", e));
            redirect("/config")
        }
    }
}

/// Registers every route of the web interface
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/status").route(web::get().to(status)))
        .service(
            web::resource("/upload")
                .route(web::get().to(upload_form))
                .route(web::post().to(upload)),
        )
        .service(web::resource("/start_campaign").route(web::get().to(start_campaign)))
        .service(
            web::resource("/config")
                .route(web::get().to(config_form))
                .route(web::post().to(update_config)),
        );
}

/// Uploads directory from `BULKMAIL_UPLOAD_DIR`, defaulting to `uploads`
pub fn upload_dir_from_env() -> PathBuf {
    std::env::var(UPLOAD_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| Path::new(DEFAULT_UPLOAD_DIR).to_path_buf())
}
