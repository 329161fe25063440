//! Notification of documents that hit enough keywords.
//!
//! A [`Notifier`] delivers one message per document. Every attempt, sent or
//! failed, is recorded in the notification log by [`notify_document`].
//! SMTP delivery goes through `lettre` on the blocking pool; credentials come
//! from `SMTP_USER` / `SMTP_PASSWORD`.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{error, info, warn};

use crate::config::NotifyConfig;
use crate::error::RegwatchError;
use crate::models::{Document, KeywordMatch, NotificationLog, NotificationStatus};
use crate::store::{NewNotification, Store};

/// A message ready for delivery.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Recipients as recorded in the log.
    fn recipients(&self) -> Vec<String>;

    async fn send(&self, notification: &Notification) -> Result<(), RegwatchError>;
}

/// Writes notifications to the log instead of delivering them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn recipients(&self) -> Vec<String> {
        vec!["log".to_string()]
    }

    async fn send(&self, notification: &Notification) -> Result<(), RegwatchError> {
        info!(subject = %notification.subject, "notification\n{}", notification.body);
        Ok(())
    }
}

pub struct SmtpNotifier {
    host: String,
    port: u16,
    from: String,
    recipients: Vec<String>,
    credentials: Credentials,
}

impl SmtpNotifier {
    /// Returns `None` when any part of the SMTP setup is missing.
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        let host = config.smtp_host.clone()?;
        let from = config.from.clone()?;
        let user = std::env::var("SMTP_USER").ok()?;
        let password = std::env::var("SMTP_PASSWORD").ok()?;
        let recipients: Vec<String> = config
            .recipients
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            return None;
        }
        Some(Self {
            host,
            port: config.smtp_port,
            from,
            recipients,
            credentials: Credentials::new(user, password),
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, RegwatchError> {
        let parse = |addr: &str| {
            addr.parse::<Mailbox>()
                .map_err(|e| RegwatchError::Notification(format!("invalid address {}: {}", addr, e)))
        };
        let mut builder = Message::builder()
            .from(parse(&self.from)?)
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.recipients {
            builder = builder.to(parse(to)?);
        }
        builder
            .body(notification.body.clone())
            .map_err(|e| RegwatchError::Notification(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    fn recipients(&self) -> Vec<String> {
        self.recipients.clone()
    }

    async fn send(&self, notification: &Notification) -> Result<(), RegwatchError> {
        let message = self.build_message(notification)?;
        let mailer = SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| RegwatchError::Notification(e.to_string()))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();

        tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| RegwatchError::Notification(e.to_string()))?
            .map_err(|e| RegwatchError::Notification(e.to_string()))?;
        Ok(())
    }
}

/// Build the notifier for `config`. `None` means notifications are off,
/// either by choice or because the SMTP setup is incomplete.
pub fn create_notifier(config: &NotifyConfig) -> Option<Arc<dyn Notifier>> {
    match config.provider.as_str() {
        "log" => Some(Arc::new(LogNotifier)),
        "smtp" => match SmtpNotifier::from_config(config) {
            Some(smtp) => Some(Arc::new(smtp)),
            None => {
                warn!("SMTP configuration incomplete, notifications are skipped");
                None
            }
        },
        _ => None,
    }
}

pub fn build_subject(document: &Document) -> String {
    format!("[RegWatch] New/Updated document: {}", document.title)
}

pub fn build_notification_body(document: &Document, matches: &[KeywordMatch]) -> String {
    let mut lines = vec![
        format!("Document: {}", document.title),
        format!("Source: {}", document.source),
        format!("URL: {}", document.url),
        format!("Version: {}", document.version),
        String::new(),
        "Keywords detected:".to_string(),
    ];
    for m in matches {
        lines.push(format!("- {} (occurrences: {})", m.keyword, m.occurrences));
        if let Some(snippet) = &m.context_snippet {
            lines.push(format!("  Context: {}", snippet));
            lines.push(String::new());
        }
    }
    lines.join("\n")
}

/// Send the notification for `document` and record the attempt. A delivery
/// failure is logged with status ERROR and returned as `Ok`; only a failure
/// to write the log row is an error.
pub async fn notify_document(
    notifier: &dyn Notifier,
    store: &dyn Store,
    document: &Document,
    matches: &[KeywordMatch],
) -> Result<NotificationLog, RegwatchError> {
    let notification = Notification {
        subject: build_subject(document),
        body: build_notification_body(document, matches),
    };

    let (status, error_message) = match notifier.send(&notification).await {
        Ok(()) => {
            info!(document_id = document.id, via = notifier.name(), "notification sent");
            (NotificationStatus::Sent, None)
        }
        Err(e) => {
            error!(document_id = document.id, via = notifier.name(), error = %e, "notification failed");
            (NotificationStatus::Error, Some(e.to_string()))
        }
    };

    let log = store
        .log_notification(NewNotification {
            document_id: document.id,
            subject: notification.subject,
            recipients: notifier.recipients().join(","),
            status,
            error_message,
        })
        .await?;
    Ok(log)
}
