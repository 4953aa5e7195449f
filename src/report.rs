//! Notification carrying the inventory report to its recipients
//!
//! Delivery is left to a [`Mailer`]; this module builds the message and its
//! transactional-mail payload.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

/// A file attached to the notification, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub content: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub disposition: String,
}

impl Attachment {
    pub fn from_bytes(filename: &str, bytes: &[u8]) -> Self {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("octet-stream");

        Attachment {
            content: base64::engine::general_purpose::STANDARD.encode(bytes),
            filename: filename.to_string(),
            mime_type: format!("application/{}", extension),
            disposition: String::from("attachment"),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .context(format!("Failed to read attachment: {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Attachment path has no file name")?;
        Ok(Self::from_bytes(filename, &bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl Notification {
    /// The dated inventory report message
    pub fn inventory(from: &str, to: &str, date: NaiveDate) -> Self {
        Notification {
            from: from.to_string(),
            to: to.to_string(),
            subject: format!("Azure Inventory on {}", date),
            body: format!(
                "Hello Team,\nKindly find the Azure inventory as of {} in the Attachment.\n\nThanks & Regards,\nAzure Automation (pyauto)",
                date
            ),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Request body for a transactional mail send endpoint
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "personalizations": [{"to": [{"email": self.to}]}],
            "from": {"email": self.from},
            "subject": self.subject,
            "content": [{"type": "text/plain", "value": self.body}],
        });
        if let Some(attachment) = &self.attachment {
            payload["attachments"] = json!([attachment]);
        }
        payload
    }
}

/// Collaborator that delivers a notification
pub trait Mailer {
    /// Send the message, returning the service's HTTP status code
    fn send(&mut self, notification: &Notification) -> Result<u16>;
}
