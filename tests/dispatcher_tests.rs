// SPDX-License-Identifier: Apache-2.0
use bulkmail::cleaner::Recipient;
use bulkmail::config::CampaignConfig;
use bulkmail::dispatcher::{build_message, send_email, Dispatch, SmtpDispatcher};
use uuid::Uuid;
use bulkmail::error::SendError;

fn config() -> CampaignConfig {
    CampaignConfig {
        smtp_server: "smtp.invalid".into(),
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
fn test_missing_credentials_fail_before_connecting() {
    // No SMTP server configured at all, so any connection attempt would error differently
    let config = CampaignConfig::default();

    let result = send_email("john@x.com", "John", &config);

    assert!(matches!(result, Err(SendError::MissingCredentials)));
}

#[test]
fn test_missing_password_fails_through_trait() {
    let config = CampaignConfig {
        password: String::new(),
        ..config()
    };
    let recipient = Recipient {
        email: "john@x.com".into(),
        first_name: "John".into(),
    };

    let result = SmtpDispatcher.dispatch(&recipient, &config);

    assert!(matches!(result, Err(SendError::MissingCredentials)));
}

#[test]
fn test_message_headers() {
    let outgoing = build_message("john@x.com", "John", &config()).unwrap();
    let formatted = String::from_utf8(outgoing.message.formatted()).unwrap();

    assert!(formatted.contains("From: Campaign <sender@example.com>"));
    assert!(formatted.contains("To: john@x.com"));
    assert!(formatted.contains("Subject: Hello"));
    assert!(formatted.contains(
        "List-Unsubscribe: <https://example.org/unsubscribe?email=john%40x.com>"
    ));
    assert!(formatted.contains("multipart/alternative"));
    assert!(formatted.contains("text/html"));
}

#[test]
fn test_blank_subject_uses_placeholder() {
    let config = CampaignConfig {
        subject: String::new(),
        ..config()
    };

    let outgoing = build_message("john@x.com", "John", &config).unwrap();
    let formatted = String::from_utf8(outgoing.message.formatted()).unwrap();

    assert!(formatted.contains("Subject: Your Subject Here"));
}

#[test]
fn test_invalid_recipient_is_an_address_error() {
    let result = build_message("not-an-email", "John", &config());

    assert!(matches!(result, Err(SendError::Address(_))));
}

#[test]
fn test_message_body_carries_its_tracking_pixel() {
    let outgoing = build_message("john@x.com", "John", &config()).unwrap();
    let formatted = String::from_utf8(outgoing.message.formatted()).unwrap();

    assert!(Uuid::parse_str(&outgoing.tracking_id).is_ok());
    assert!(formatted.contains("<p>Hi John!</p>"));
    assert!(formatted.contains(&format!(
        "<img src=\"https://example.org/track?id={}\"",
        outgoing.tracking_id
    )));
}

#[test]
fn test_each_message_gets_its_own_tracking_id() {
    let first = build_message("john@x.com", "John", &config()).unwrap();
    let second = build_message("john@x.com", "John", &config()).unwrap();

    assert_ne!(first.tracking_id, second.tracking_id);
}
