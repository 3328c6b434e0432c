use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Best-effort delivery of an HTML message; a failure propagates to the
/// caller, no retry.
pub trait MailSender {
    fn send(&self, to: &[String], subject: &str, html_body: &str) -> Result<(), MailError>;
}

#[derive(Debug, Serialize)]
struct SpooledMessage<'a> {
    to: &'a [String],
    subject: &'a str,
    html_body: &'a str,
    queued_at: String,
}

/// Writes each message as a JSON file under `<workspace>/outbox/`. A
/// transport picks the spool up out-of-process; swapping in a direct SMTP
/// sender is a matter of implementing `MailSender`.
pub struct SpoolMailer {
    outbox: PathBuf,
}

impl SpoolMailer {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        let outbox = workspace.join("outbox");
        std::fs::create_dir_all(&outbox)?;
        Ok(Self { outbox })
    }
}

impl MailSender for SpoolMailer {
    fn send(&self, to: &[String], subject: &str, html_body: &str) -> Result<(), MailError> {
        if to.is_empty() {
            return Err(MailError::Delivery("no recipients".to_string()));
        }
        let message = SpooledMessage {
            to,
            subject,
            html_body,
            queued_at: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec_pretty(&message)
            .map_err(|e| MailError::Delivery(e.to_string()))?;
        let path = self.outbox.join(format!("{}.json", Uuid::new_v4()));
        std::fs::write(&path, payload).map_err(|e| MailError::Delivery(e.to_string()))?;
        Ok(())
    }
}
