// SPDX-License-Identifier: Apache-2.0
use lettre::message::header::{HeaderName, HeaderValue};
use lettre::message::{Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport, Transport};
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::cleaner::{DEFAULT_FIRST_NAME, Recipient};
use crate::config::CampaignConfig;
use crate::error::SendError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends one campaign email. Implemented by [`SmtpDispatcher`] and by test doubles.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, recipient: &Recipient, config: &CampaignConfig) -> Result<(), SendError>;
}

/// Delivers through the SMTP relay named in the config
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpDispatcher;

impl Dispatch for SmtpDispatcher {
    fn dispatch(&self, recipient: &Recipient, config: &CampaignConfig) -> Result<(), SendError> {
        send_email(&recipient.email, &recipient.first_name, config)
    }
}

pub fn unsubscribe_link(email: &str, config: &CampaignConfig) -> String {
    format!(
        "https://{}/unsubscribe?email={}",
        config.unsubscribe_domain,
        urlencoding::encode(email)
    )
}

/// Appends the invisible 1x1 tracking image to the rendered body
pub fn add_tracking_pixel(html_body: &str, tracking_id: &str, config: &CampaignConfig) -> String {
    format!(
        "{}<img src=\"{}{}\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none;\" />",
        html_body, config.tracking_url, tracking_id
    )
}

/// Fills `{first_name}` into the configured template
pub fn render_body(first_name: &str, config: &CampaignConfig) -> String {
    let first_name = match first_name.trim() {
        "" => DEFAULT_FIRST_NAME,
        name => name,
    };
    config.email_template_html.replace("{first_name}", first_name)
}

/// Template body plus the tracking pixel for `tracking_id`
pub fn render_html(first_name: &str, tracking_id: &str, config: &CampaignConfig) -> String {
    add_tracking_pixel(&render_body(first_name, config), tracking_id, config)
}

/// A built message and the tracking id embedded in its pixel
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub message: Message,
    pub tracking_id: String,
}

/// Builds the full message for one recipient without touching the network.
///
/// Every call draws a fresh tracking id.
pub fn build_message(
    recipient_email: &str,
    first_name: &str,
    config: &CampaignConfig,
) -> Result<OutgoingMessage, SendError> {
    let from = Mailbox::new(
        Some(config.sender_name.clone()),
        config.email.parse::<Address>()?,
    );
    let tracking_id = Uuid::new_v4().to_string();
    let html_body = render_html(first_name, &tracking_id, config);

    let list_unsubscribe = HeaderValue::new(
        HeaderName::new_from_ascii_str("List-Unsubscribe"),
        format!("<{}>", unsubscribe_link(recipient_email, config)),
    );

    let message = Message::builder()
        .from(from)
        .to(recipient_email.parse::<Mailbox>()?)
        .subject(config.subject_or_default())
        .raw_header(list_unsubscribe)
        .multipart(MultiPart::alternative().singlepart(SinglePart::html(html_body)))?;

    Ok(OutgoingMessage {
        message,
        tracking_id,
    })
}

/// Sends one templated campaign email over STARTTLS.
///
/// Fails fast without any network traffic when the account or password is
/// missing. Every failure is logged with the recipient before it is returned.
#[instrument(skip(first_name, config), fields(recipient = %recipient_email))]
pub fn send_email(
    recipient_email: &str,
    first_name: &str,
    config: &CampaignConfig,
) -> Result<(), SendError> {
    if !config.has_credentials() {
        error!("Email credentials not configured!");
        return Err(SendError::MissingCredentials);
    }

    let result = build_message(recipient_email, first_name, config).and_then(|outgoing| {
        deliver(&outgoing.message, config)?;
        Ok(outgoing.tracking_id)
    });

    match result {
        Ok(tracking_id) => {
            info!(
                tracking_id = %tracking_id,
                "Email sent successfully to {}, Name: {}",
                recipient_email,
                first_name.trim()
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Error sending email to {}", recipient_email);
            Err(e)
        }
    }
}

fn deliver(message: &Message, config: &CampaignConfig) -> Result<(), SendError> {
    let creds = Credentials::new(config.email.clone(), config.password.clone());

    let mailer = SmtpTransport::starttls_relay(&config.smtp_server)?
        .port(config.smtp_port)
        .credentials(creds)
        .timeout(Some(SMTP_TIMEOUT))
        .build();

    mailer.send(message)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CampaignConfig {
        CampaignConfig {
            email: "sender@example.com".into(),
            password: "secret".into(),
            subject: "Hello".into(),
            email_template_html: "<p>Hi {first_name}!</p>".into(),
            unsubscribe_domain: "example.org".into(),
            tracking_url: "https://example.org/track?id=".into(),
            ..CampaignConfig::default()
        }
    }

    #[test]
    fn body_substitutes_first_name() {
        assert_eq!(render_body("Jane", &config()), "<p>Hi Jane!</p>");
        assert_eq!(render_body("  Jane ", &config()), "<p>Hi Jane!</p>");
    }

    #[test]
    fn blank_first_name_becomes_candidate() {
        assert_eq!(render_body("   ", &config()), "<p>Hi Candidate!</p>");
    }

    #[test]
    fn unsubscribe_link_encodes_address() {
        assert_eq!(
            unsubscribe_link("john+news@x.com", &config()),
            "https://example.org/unsubscribe?email=john%2Bnews%40x.com"
        );
    }

    #[test]
    fn tracking_pixel_is_appended() {
        let body = add_tracking_pixel("<p>Hi</p>", "abc-123", &config());
        assert_eq!(
            body,
            "<p>Hi</p><img src=\"https://example.org/track?id=abc-123\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none;\" />"
        );
    }

    #[test]
    fn bad_sender_address_is_reported() {
        let config = CampaignConfig {
            email: "not an address".into(),
            ..config()
        };
        let result = build_message("john@x.com", "John", &config);
        assert!(matches!(result, Err(SendError::Address(_))));
    }

    #[test]
    fn html_ends_with_tracking_pixel() {
        let html = render_html("Jane", "abc-123", &config());
        assert!(html.starts_with("<p>Hi Jane!</p>"));
        assert!(html.ends_with(
            "<img src=\"https://example.org/track?id=abc-123\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none;\" />"
        ));
    }
}
