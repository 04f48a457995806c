//! Transactional email transport.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use clearview_core::{defaults, Error, Result};

/// A file attached to an outbound email.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// One message to send.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Sends email. Returns the provider's message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<String>;
}

/// Email transport and addressing configuration.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub api_url: String,
    /// No key means every send fails with a configuration error.
    pub api_key: Option<String>,
    pub from: String,
    /// Clinician address. Unset skips the clinician summary.
    pub doctor_email: Option<String>,
    pub clinic_name: String,
    pub timeout_seconds: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::EMAIL_API_URL.to_string(),
            api_key: None,
            from: format!("{} <noreply@clearview.local>", defaults::CLINIC_NAME),
            doctor_email: None,
            clinic_name: defaults::CLINIC_NAME.to_string(),
            timeout_seconds: defaults::EMAIL_TIMEOUT_SECS,
        }
    }
}

impl MailerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `EMAIL_API_URL` | Provider endpoint |
    /// | `EMAIL_API_KEY` | Provider key |
    /// | `EMAIL_FROM` | Sender address |
    /// | `DOCTOR_EMAIL` | Clinician address for call summaries |
    /// | `CLINIC_NAME` | Name used in templates and the handout |
    pub fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();
        if let Some(url) = non_empty("EMAIL_API_URL") {
            config.api_url = url;
        }
        config.api_key = non_empty("EMAIL_API_KEY");
        if let Some(clinic) = non_empty("CLINIC_NAME") {
            config.from = format!("{} <noreply@clearview.local>", clinic);
            config.clinic_name = clinic;
        }
        if let Some(from) = non_empty("EMAIL_FROM") {
            config.from = from;
        }
        config.doctor_email = non_empty("DOCTOR_EMAIL");
        config
    }

    pub fn with_doctor_email(mut self, email: impl Into<String>) -> Self {
        self.doctor_email = Some(email.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendAttachment<'a>>,
}

#[derive(Serialize)]
struct SendAttachment<'a> {
    filename: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// HTTP mailer for a Resend-compatible API.
pub struct HttpMailer {
    client: Client,
    config: MailerConfig,
}

impl HttpMailer {
    pub fn new(config: MailerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Email(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(Error::Config("email API key not configured".to_string()));
        };

        let engine = base64::engine::general_purpose::STANDARD;
        let request = SendRequest {
            from: &email.from,
            to: vec![email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            attachments: email
                .attachments
                .iter()
                .map(|a| SendAttachment {
                    filename: &a.filename,
                    content: engine.encode(&a.content),
                })
                .collect(),
        };

        debug!(
            subsystem = "jobs",
            component = "mailer",
            op = "send",
            attachments = email.attachments.len(),
            "Sending email"
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Email(format!("send failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Email(format!(
                "provider returned {}: {}",
                status, body
            )));
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::Email(format!("invalid provider response: {}", e)))?;
        Ok(body.id.unwrap_or_default())
    }
}

/// In-memory mailer that records every message.
#[cfg(any(test, feature = "mock"))]
pub use recording::RecordingMailer;

#[cfg(any(test, feature = "mock"))]
mod recording {
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    #[derive(Clone, Default)]
    pub struct RecordingMailer {
        sent: Arc<Mutex<Vec<OutboundEmail>>>,
        failing: Arc<Mutex<Vec<String>>>,
    }

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sends to this address fail.
        pub fn fail_for(&self, address: impl Into<String>) {
            lock(&self.failing).push(address.into());
        }

        pub fn sent(&self) -> Vec<OutboundEmail> {
            lock(&self.sent).clone()
        }

        pub fn sent_to(&self, address: &str) -> Vec<OutboundEmail> {
            lock(&self.sent)
                .iter()
                .filter(|e| e.to == address)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<String> {
            if lock(&self.failing).contains(&email.to) {
                return Err(Error::Email(format!("rejected recipient {}", email.to)));
            }
            let mut sent = lock(&self.sent);
            sent.push(email.clone());
            Ok(format!("msg_{}", sent.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutboundEmail {
        OutboundEmail {
            from: "Clinic <noreply@clinic.test>".to_string(),
            to: "ann@example.com".to_string(),
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            attachments: vec![Attachment {
                filename: "summary.pdf".to_string(),
                content: b"%PDF-1.3".to_vec(),
            }],
        }
    }

    #[test]
    fn test_request_shape() {
        let e = email();
        let request = SendRequest {
            from: &e.from,
            to: vec![&e.to],
            subject: &e.subject,
            html: &e.html,
            attachments: vec![SendAttachment {
                filename: "summary.pdf",
                content: "JVBERi0xLjM=".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["to"][0], "ann@example.com");
        assert_eq!(json["attachments"][0]["content"], "JVBERi0xLjM=");
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_fails_with_config_error() {
        let mailer = HttpMailer::new(MailerConfig::default()).unwrap();
        assert!(!mailer.is_configured());
        let err = mailer.send(&email()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_recording_mailer() {
        let mailer = RecordingMailer::new();
        mailer.fail_for("bad@example.com");

        assert_eq!(mailer.send(&email()).await.unwrap(), "msg_1");
        let mut bad = email();
        bad.to = "bad@example.com".to_string();
        assert!(mailer.send(&bad).await.is_err());
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(mailer.sent_to("ann@example.com").len(), 1);
    }

    #[test]
    fn test_config_builders() {
        let config = MailerConfig::default()
            .with_doctor_email("dr@clinic.test")
            .with_api_key("re_123")
            .with_api_url("http://localhost:9999/emails");
        assert_eq!(config.doctor_email.as_deref(), Some("dr@clinic.test"));
        assert_eq!(config.api_key.as_deref(), Some("re_123"));
        assert_eq!(config.api_url, "http://localhost:9999/emails");
    }
}
