use std::fs;
use std::path::PathBuf;

use billing_core::time::now_millis;
use tracing::{info, warn};

use crate::error::{ProcessorError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

/// Delivers alert notifications.
pub trait AlertSender: Send + Sync {
    fn send(&self, message: &AlertMessage) -> Result<()>;
}

/// Drops each message as an HTML mail file into an outbox directory for a
/// relay to pick up.
#[derive(Debug, Clone)]
pub struct OutboxAlertSender {
    outbox_dir: PathBuf,
}

impl OutboxAlertSender {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
        }
    }

    fn render(message: &AlertMessage) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
            message.from,
            message.to.join(", "),
            message.subject,
            message.html_body
        )
    }
}

impl AlertSender for OutboxAlertSender {
    fn send(&self, message: &AlertMessage) -> Result<()> {
        fs::create_dir_all(&self.outbox_dir).map_err(|err| {
            ProcessorError::AlertDispatch(format!("create {}: {}", self.outbox_dir.display(), err))
        })?;
        let path = self.outbox_dir.join(format!("ondemand-alert-{}.eml", now_millis()));
        fs::write(&path, Self::render(message)).map_err(|err| {
            ProcessorError::AlertDispatch(format!("write {}: {}", path.display(), err))
        })?;
        info!(path = %path.display(), recipients = message.to.len(), "queued alert message");
        Ok(())
    }
}

/// Used when no outbox is configured; the alert only reaches the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertSender;

impl AlertSender for LoggingAlertSender {
    fn send(&self, message: &AlertMessage) -> Result<()> {
        warn!(subject = %message.subject, to = %message.to.join(","), "on-demand alert");
        Ok(())
    }
}
