use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use volja_core::notification::{Attachment, NotificationDispatch, CHANNEL_EMAIL};

/// Sender address attached to every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub name: Option<String>,
}

/// Email provider backed by SendGrid dynamic templates.
#[derive(Clone)]
pub struct SendGridClient {
    http: Client,
    base_url: Url,
    api_key: String,
    from: Sender,
}

impl SendGridClient {
    pub fn new(api_key: impl Into<String>, from: Sender, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
            from,
        }
    }

    /// Sends one dispatch. Only the email channel is accepted.
    pub async fn send(&self, dispatch: &NotificationDispatch) -> Result<(), SendGridError> {
        if dispatch.channel != CHANNEL_EMAIL {
            return Err(SendGridError::UnsupportedChannel(dispatch.channel.clone()));
        }
        if dispatch.template.trim().is_empty() {
            return Err(SendGridError::MissingTemplate);
        }
        if dispatch.to.trim().is_empty() {
            return Err(SendGridError::MissingRecipient);
        }

        let url = self.base_url.join("v3/mail/send")?;
        let body = MailSendRequest::from_dispatch(dispatch, &self.from);
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        ensure_success(response).await
    }
}

#[derive(Serialize)]
struct MailSendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    template_id: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<MailAttachment<'a>>,
}

impl<'a> MailSendRequest<'a> {
    fn from_dispatch(dispatch: &'a NotificationDispatch, from: &'a Sender) -> Self {
        Self {
            personalizations: [Personalization {
                to: [Address {
                    email: &dispatch.to,
                    name: None,
                }],
                dynamic_template_data: &dispatch.data,
            }],
            from: Address {
                email: &from.email,
                name: from.name.as_deref(),
            },
            template_id: &dispatch.template,
            attachments: dispatch.attachments.iter().map(MailAttachment::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
    dynamic_template_data: &'a Value,
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct MailAttachment<'a> {
    content: &'a str,
    filename: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    disposition: &'a str,
}

impl<'a> From<&'a Attachment> for MailAttachment<'a> {
    fn from(value: &'a Attachment) -> Self {
        Self {
            content: &value.content,
            filename: &value.filename,
            content_type: &value.content_type,
            disposition: &value.disposition,
        }
    }
}

/// Errors produced by the SendGrid client.
#[derive(Debug, Error)]
pub enum SendGridError {
    #[error("channel {0} is not supported by the email provider")]
    UnsupportedChannel(String),
    #[error("dispatch has no template id")]
    MissingTemplate,
    #[error("dispatch has no recipient")]
    MissingRecipient,
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn ensure_success(response: Response) -> Result<(), SendGridError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(SendGridError::Status { status, body });
    }
    Ok(())
}
