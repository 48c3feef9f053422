use std::collections::BTreeMap;

use lettre::Address;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

fn default_content_type() -> String {
    "application/octet-stream".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: String,
    /// Base64 encoded payload
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Content-ID for inline parts referenced from the HTML body as `cid:...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

impl EmailAttachment {
    pub fn cid(&self) -> Option<&str> {
        non_empty(self.cid.as_deref())
    }
}

/// An outbound email as posted to `/api/v1/send`.
///
/// Optional strings and lists that are present but empty are treated the same
/// as absent ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    #[serde(rename = "from")]
    pub from_email: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    pub to: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<Address>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<Address>>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<EmailAttachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl EmailRequest {
    /// Checks the constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.to.is_empty() {
            return Err(ValidationError::new(
                "to",
                "at least one recipient is required",
            ));
        }
        if self.subject.is_empty() {
            return Err(ValidationError::new("subject", "must not be empty"));
        }
        if self.attachments().iter().any(|a| a.filename.is_empty()) {
            return Err(ValidationError::new(
                "attachments.filename",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Whether the request carries a text or an HTML body.
    pub fn has_content(&self) -> bool {
        self.text().is_some() || self.html().is_some()
    }

    pub fn from_name(&self) -> Option<&str> {
        non_empty(self.from_name.as_deref())
    }

    pub fn text(&self) -> Option<&str> {
        non_empty(self.text.as_deref())
    }

    pub fn html(&self) -> Option<&str> {
        non_empty(self.html.as_deref())
    }

    pub fn cc(&self) -> &[Address] {
        self.cc.as_deref().unwrap_or_default()
    }

    pub fn bcc(&self) -> &[Address] {
        self.bcc.as_deref().unwrap_or_default()
    }

    pub fn attachments(&self) -> &[EmailAttachment] {
        self.attachments.as_deref().unwrap_or_default()
    }

    /// Custom headers, empty when none were supplied.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flatten()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// `To` recipients joined for logging.
    pub fn recipients(&self) -> String {
        self.to
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether a custom header with this name (case-insensitive) was supplied.
    pub fn overrides(&self, name: &str) -> bool {
        self.headers().any(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailResponse {
    pub success: bool,
    pub message: String,
    pub message_id: Option<String>,
}

impl EmailResponse {
    pub fn sent(message_id: String) -> Self {
        Self {
            success: true,
            message: "Email sent successfully".into(),
            message_id: Some(message_id),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            message_id: None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
