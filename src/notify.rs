//! Alert rendering and channel transports.
//!
//! One canonical [`Alert`] payload, three transports: SMTP email (HTML),
//! Slack-style chat webhook (`{"text": …}`), and a generic JSON webhook.
//! Transient transport failures retry up to three times with exponential
//! backoff (1 s, 2 s, 4 s); permanent failures — misconfigured channels,
//! 4xx responses — are reported back so the scheduler can decide whether
//! to stamp the alert as delivered.

use std::time::Duration;

use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::{debug, warn};

use crate::storage::{AlertChannelRow, AlertKind, ChannelKind};

const MAX_RETRIES: u32 = 3;

/// The canonical alert payload rendered into every channel shape.
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub tenant: String,
    pub threshold: f64,
    pub observed: f64,
    /// Human-readable window label, e.g. `2026-08-01` or `rolling 1h`.
    pub window: String,
    pub detected_at: DateTime<Utc>,
}

impl Alert {
    pub fn subject(&self) -> String {
        format!("[Cognitude] {} alert for {}", self.kind, self.tenant)
    }

    fn unit(&self) -> &'static str {
        match self.kind {
            AlertKind::DailyCost | AlertKind::MonthlyCost => "$",
            AlertKind::RateLimitWarning => " req",
            AlertKind::CacheHitWarning => "%",
        }
    }

    pub fn summary(&self) -> String {
        let unit = self.unit();
        match self.kind {
            AlertKind::CacheHitWarning => format!(
                "{} for {}: hit rate {:.1}{unit} fell below {:.1}{unit} ({})",
                self.kind, self.tenant, self.observed, self.threshold, self.window
            ),
            AlertKind::DailyCost | AlertKind::MonthlyCost => format!(
                "{} for {}: {unit}{:.4} reached threshold {unit}{:.4} ({})",
                self.kind, self.tenant, self.observed, self.threshold, self.window
            ),
            AlertKind::RateLimitWarning => format!(
                "{} for {}: {:.0}{unit} reached threshold {:.0}{unit} ({})",
                self.kind, self.tenant, self.observed, self.threshold, self.window
            ),
        }
    }

    pub fn html_body(&self) -> String {
        format!(
            "<html><body>\
             <h2>{}</h2>\
             <p>{}</p>\
             <table>\
             <tr><td>Tenant</td><td>{}</td></tr>\
             <tr><td>Threshold</td><td>{:.6}</td></tr>\
             <tr><td>Observed</td><td>{:.6}</td></tr>\
             <tr><td>Window</td><td>{}</td></tr>\
             <tr><td>Detected at</td><td>{}</td></tr>\
             </table>\
             </body></html>",
            self.subject(),
            self.summary(),
            self.tenant,
            self.threshold,
            self.observed,
            self.window,
            self.detected_at.to_rfc3339(),
        )
    }

    pub fn json_payload(&self) -> serde_json::Value {
        json!({
            "kind": self.kind.as_str(),
            "tenant": self.tenant,
            "threshold": self.threshold,
            "observed": self.observed,
            "window": self.window,
            "detected_at": self.detected_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Failed after exhausting retries; worth trying again next tick.
    Transient(String),
    /// Channel misconfiguration or a definitive rejection; retrying is
    /// pointless until the channel is fixed.
    Permanent(String),
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: String,
    pub password: String,
}

pub struct Notifier {
    http: reqwest::Client,
    smtp: Option<SmtpSettings>,
    backoff_base: Duration,
}

impl Notifier {
    pub fn new(smtp: Option<SmtpSettings>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("default reqwest client construction cannot fail"),
            smtp,
            backoff_base: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Send an alert through one channel, retrying transient failures.
    pub async fn dispatch(&self, channel: &AlertChannelRow, alert: &Alert) -> DispatchOutcome {
        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff_base * 2u32.pow(attempt - 1);
                debug!(channel = channel.id, attempt, ?delay, "retrying alert dispatch");
                tokio::time::sleep(delay).await;
            }
            match self.send_once(channel, alert).await {
                DispatchOutcome::Delivered => return DispatchOutcome::Delivered,
                DispatchOutcome::Permanent(e) => {
                    warn!(channel = channel.id, error = %e, "alert channel failed permanently");
                    return DispatchOutcome::Permanent(e);
                }
                DispatchOutcome::Transient(e) => last_error = e,
            }
        }
        warn!(channel = channel.id, error = %last_error, "alert dispatch exhausted retries");
        DispatchOutcome::Transient(last_error)
    }

    async fn send_once(&self, channel: &AlertChannelRow, alert: &Alert) -> DispatchOutcome {
        match channel.kind {
            ChannelKind::Email => self.send_email(channel, alert).await,
            ChannelKind::ChatWebhook => {
                self.post_webhook(channel, json!({"text": alert.summary()}))
                    .await
            }
            ChannelKind::GenericWebhook => self.post_webhook(channel, alert.json_payload()).await,
        }
    }

    async fn send_email(&self, channel: &AlertChannelRow, alert: &Alert) -> DispatchOutcome {
        let Some(smtp) = &self.smtp else {
            return DispatchOutcome::Permanent("SMTP is not configured on this gateway".into());
        };
        let Some(to) = channel.config.get("to").and_then(|v| v.as_str()) else {
            return DispatchOutcome::Permanent("email channel is missing `to`".into());
        };

        let message = match build_email(smtp, to, alert) {
            Ok(m) => m,
            Err(e) => return DispatchOutcome::Permanent(e),
        };

        let transport: AsyncSmtpTransport<Tokio1Executor> = match AsyncSmtpTransport::<
            Tokio1Executor,
        >::relay(&smtp.host)
        {
            Ok(builder) => builder
                .port(smtp.port)
                .credentials(Credentials::new(
                    smtp.username.clone(),
                    smtp.password.clone(),
                ))
                .build(),
            Err(e) => return DispatchOutcome::Permanent(format!("SMTP relay setup: {e}")),
        };

        match transport.send(message).await {
            Ok(_) => DispatchOutcome::Delivered,
            Err(e) => DispatchOutcome::Transient(format!("SMTP send failed: {e}")),
        }
    }

    async fn post_webhook(
        &self,
        channel: &AlertChannelRow,
        payload: serde_json::Value,
    ) -> DispatchOutcome {
        let Some(url) = channel.config.get("url").and_then(|v| v.as_str()) else {
            return DispatchOutcome::Permanent("webhook channel is missing `url`".into());
        };

        match self.http.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => DispatchOutcome::Delivered,
            Ok(resp) => {
                let status = resp.status().as_u16();
                let message = format!("webhook returned HTTP {status}");
                match status {
                    408 | 429 | 500..=599 => DispatchOutcome::Transient(message),
                    _ => DispatchOutcome::Permanent(message),
                }
            }
            Err(e) => DispatchOutcome::Transient(format!("webhook POST failed: {e}")),
        }
    }
}

fn build_email(smtp: &SmtpSettings, to: &str, alert: &Alert) -> Result<Message, String> {
    Message::builder()
        .from(
            smtp.from
                .parse()
                .map_err(|e| format!("invalid `from` address: {e}"))?,
        )
        .to(to.parse().map_err(|e| format!("invalid `to` address: {e}"))?)
        .subject(alert.subject())
        .header(ContentType::TEXT_HTML)
        .body(alert.html_body())
        .map_err(|e| format!("building email: {e}"))
}
