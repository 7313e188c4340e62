//! Email notification about newly discovered projects.

use anyhow::{Context, Result};
use askama::Template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gulp_core::Record;
use lettre::message::{header::ContentType, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_SENDER: &str = "GULP Job Scraper <noreply@example.com>";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfigState {
    pub is_configured: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub sender: String,
    pub frontend_url: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    fn is_configured(&self) -> bool;

    fn config_status(&self) -> EmailConfigState;

    /// Deliver a notification; `false` on any failure, which is logged.
    async fn send(&self, recipient: &str, records: &[Record], scan_time: DateTime<Utc>) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sender: String,
    pub frontend_url: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_SMTP_PORT,
            user: None,
            password: None,
            sender: DEFAULT_SENDER.to_string(),
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
        }
    }
}

impl SmtpSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            host: non_empty("SMTP_HOST"),
            port: non_empty("SMTP_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            user: non_empty("SMTP_USER"),
            password: non_empty("SMTP_PASSWORD"),
            sender: non_empty("EMAIL_SENDER").unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            frontend_url: non_empty("FRONTEND_URL").unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.host.is_some() && self.port != 0 && self.user.is_some() && self.password.is_some()
    }
}

pub fn subject_for(count: usize) -> String {
    format!("GULP Job Scraper: {count} neue Projekte gefunden")
}

struct EmailRow {
    title: String,
    company: String,
    location: String,
    url: Option<String>,
}

#[derive(Template)]
#[template(path = "new_projects_email.html")]
struct NewProjectsEmail<'a> {
    count: usize,
    scan_time: String,
    frontend_url: &'a str,
    rows: Vec<EmailRow>,
}

pub fn render_body(records: &[Record], scan_time: DateTime<Utc>, frontend_url: &str) -> Result<String> {
    let rows = records
        .iter()
        .map(|r| EmailRow {
            title: r.title().to_string(),
            company: r.company().to_string(),
            location: r.location().to_string(),
            url: r.url.clone(),
        })
        .collect();
    NewProjectsEmail {
        count: records.len(),
        scan_time: scan_time.format("%d.%m.%Y %H:%M:%S").to_string(),
        frontend_url,
        rows,
    }
    .render()
    .context("rendering notification email")
}

/// SMTP delivery over STARTTLS.
#[derive(Debug, Clone)]
pub struct SmtpEmailSender {
    settings: SmtpSettings,
}

impl SmtpEmailSender {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Self {
        Self::new(SmtpSettings::from_env())
    }

    async fn deliver(&self, recipient: &str, records: &[Record], scan_time: DateTime<Utc>) -> Result<()> {
        let (Some(host), Some(user), Some(password)) = (
            self.settings.host.as_deref(),
            self.settings.user.clone(),
            self.settings.password.clone(),
        ) else {
            anyhow::bail!("smtp settings incomplete");
        };

        let from: Mailbox = self.settings.sender.parse().context("parsing sender address")?;
        let to: Mailbox = recipient.parse().context("parsing recipient address")?;
        let body = render_body(records, scan_time, &self.settings.frontend_url)?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject_for(records.len()))
            .header(ContentType::TEXT_HTML)
            .body(body)
            .context("building email message")?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("configuring smtp relay {host}"))?
            .port(self.settings.port)
            .credentials(Credentials::new(user, password))
            .build();
        mailer.send(message).await.context("sending email")?;
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    fn is_configured(&self) -> bool {
        self.settings.is_complete()
    }

    fn config_status(&self) -> EmailConfigState {
        EmailConfigState {
            is_configured: self.is_configured(),
            smtp_host: self.settings.host.clone(),
            smtp_port: self.settings.port,
            smtp_user: self.settings.user.clone(),
            sender: self.settings.sender.clone(),
            frontend_url: self.settings.frontend_url.clone(),
        }
    }

    async fn send(&self, recipient: &str, records: &[Record], scan_time: DateTime<Utc>) -> bool {
        if !self.is_configured() {
            warn!("email is not configured, nothing sent");
            return false;
        }
        if records.is_empty() {
            info!("no new projects, nothing sent");
            return false;
        }
        match self.deliver(recipient, records, scan_time).await {
            Ok(()) => {
                info!(recipient, count = records.len(), "notification sent");
                true
            }
            Err(err) => {
                warn!(recipient, error = %format!("{err:#}"), "notification failed");
                false
            }
        }
    }
}

/// Sender used when notifications are switched off entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmailSender;

#[async_trait]
impl EmailSender for NoopEmailSender {
    fn is_configured(&self) -> bool {
        false
    }

    fn config_status(&self) -> EmailConfigState {
        let defaults = SmtpSettings::default();
        EmailConfigState {
            is_configured: false,
            smtp_host: None,
            smtp_port: defaults.port,
            smtp_user: None,
            sender: defaults.sender,
            frontend_url: defaults.frontend_url,
        }
    }

    async fn send(&self, _recipient: &str, _records: &[Record], _scan_time: DateTime<Utc>) -> bool {
        false
    }
}
