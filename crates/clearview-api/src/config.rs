//! Server, webhook, and resend configuration, built once at startup.

use std::time::Duration;

use axum::http::HeaderValue;
use chrono::{DateTime, Utc};
use tracing::warn;

use clearview_core::{defaults, VideoStatus};

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(name: &str, default: bool) -> bool {
    env_non_empty(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub allowed_origins: Vec<String>,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            database_url: "postgres://localhost/clearview".to_string(),
            allowed_origins: vec![format!("http://localhost:{}", defaults::SERVER_PORT)],
            body_limit_bytes: defaults::WEBHOOK_BODY_LIMIT_BYTES,
        }
    }
}

impl ServerConfig {
    /// Read `HOST`, `PORT`, `DATABASE_URL`, and `ALLOWED_ORIGINS`
    /// (comma-separated).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(host) = env_non_empty("HOST") {
            config.host = host;
        }
        if let Some(port) = env_non_empty("PORT").and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Some(url) = env_non_empty("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(origins) = env_non_empty("ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        config
    }

    /// Origins as header values; invalid entries are logged and dropped.
    pub fn origin_headers(&self) -> Vec<HeaderValue> {
        self.allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", origin, e);
                    None
                }
            })
            .collect()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Webhook verification settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Unset means every delivery is answered with 500.
    pub secret: Option<String>,
    pub tolerance_secs: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance_secs: defaults::WEBHOOK_TOLERANCE_SECS,
        }
    }
}

impl WebhookConfig {
    /// Read `WEBHOOK_SECRET` (falling back to `ELEVENLABS_WEBHOOK_SECRET`)
    /// and `WEBHOOK_TOLERANCE_SECS`.
    pub fn from_env() -> Self {
        Self {
            secret: env_non_empty("WEBHOOK_SECRET")
                .or_else(|| env_non_empty("ELEVENLABS_WEBHOOK_SECRET")),
            tolerance_secs: env_non_empty("WEBHOOK_TOLERANCE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::WEBHOOK_TOLERANCE_SECS),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Manual resend behavior.
#[derive(Debug, Clone, Copy)]
pub struct ResendPolicy {
    /// Reject a resend with 409 while the call's video is `generating`.
    pub guard_generating: bool,
    /// A `generating` row last updated longer ago than this no longer blocks.
    pub generating_stale_after: Duration,
}

impl Default for ResendPolicy {
    fn default() -> Self {
        Self {
            guard_generating: true,
            generating_stale_after: Duration::from_secs(defaults::VIDEO_GENERATING_STALE_SECS),
        }
    }
}

impl ResendPolicy {
    /// Read `RESEND_GUARD_GENERATING` (default `true`) and
    /// `RESEND_GENERATING_STALE_SECS` (default `1800`).
    pub fn from_env() -> Self {
        let stale_secs = env_non_empty("RESEND_GENERATING_STALE_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::VIDEO_GENERATING_STALE_SECS);
        Self {
            guard_generating: env_flag("RESEND_GUARD_GENERATING", true),
            generating_stale_after: Duration::from_secs(stale_secs),
        }
    }

    /// Whether a call in this video state rejects a resend at `now`.
    pub fn blocks(
        &self,
        status: VideoStatus,
        updated_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.guard_generating || status != VideoStatus::Generating {
            return false;
        }
        // A timestamp ahead of `now` counts as fresh.
        (now - updated_at)
            .to_std()
            .map(|age| age < self.generating_stale_after)
            .unwrap_or(true)
    }

    pub fn with_generating_stale_after(mut self, after: Duration) -> Self {
        self.generating_stale_after = after;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 3000);
        assert_eq!(server.bind_address(), "0.0.0.0:3000");
        assert_eq!(WebhookConfig::default().tolerance_secs, 1800);
        assert!(ResendPolicy::default().guard_generating);
        assert_eq!(
            ResendPolicy::default().generating_stale_after,
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_resend_blocks_only_fresh_generating() {
        let policy = ResendPolicy::default();
        let now = Utc::now();
        let recent = now - chrono::Duration::minutes(5);
        let stale = now - chrono::Duration::hours(2);

        assert!(policy.blocks(VideoStatus::Generating, recent, now));
        assert!(!policy.blocks(VideoStatus::Generating, stale, now));
        assert!(!policy.blocks(VideoStatus::Failed, recent, now));
        assert!(policy.blocks(VideoStatus::Generating, now + chrono::Duration::seconds(5), now));

        let unguarded = ResendPolicy {
            guard_generating: false,
            ..policy
        };
        assert!(!unguarded.blocks(VideoStatus::Generating, recent, now));
    }

    #[test]
    fn test_invalid_origins_dropped() {
        let config = ServerConfig {
            allowed_origins: vec!["https://clinic.test".to_string(), "bad\norigin".to_string()],
            ..Default::default()
        };
        assert_eq!(config.origin_headers().len(), 1);
    }
}
