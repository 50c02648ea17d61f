//! # Email Dispatch
//!
//! Outbound delivery of confirmation links through a transactional mail
//! HTTP API. Delivery is attempted at most once per issuance and never
//! retried here; the protocol's durable truth lives in the credential
//! record, not in the inbox.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("mail dispatch failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), MailError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody {
    sender: EmailAddress,
    to: Vec<EmailAddress>,
    subject: String,
    html_content: String,
}

/// Mailer backed by an HTTP transactional mail API.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    sender: String,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_key: &str, sender: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), MailError> {
        let body = SendEmailBody {
            sender: EmailAddress {
                email: self.sender.clone(),
            },
            to: vec![EmailAddress {
                email: recipient.to_string(),
            }],
            subject: subject.to_string(),
            html_content: html_body.to_string(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MailError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MailError(format!("mail API returned {status}: {detail}")));
        }

        info!(recipient, subject, "confirmation email dispatched");
        Ok(())
    }
}

/// Body of the signup verification email.
pub fn verification_email(url: &str) -> (&'static str, String) {
    let body = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: auto;">
  <h2>Verify your email address</h2>
  <p>Thanks for signing up! Please verify your email to continue.</p>
  <p><a href="{url}">Verify Email</a></p>
  <p>After clicking the link, return to the app to continue.
     This link is valid for 20 minutes.</p>
  <p>If you did not request this, you can safely ignore this email.</p>
</div>"#
    );
    ("Verify Your Email Address", body)
}

/// Body of the password reset confirmation email.
pub fn reset_email(url: &str) -> (&'static str, String) {
    let body = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: auto;">
  <h2>Reset your password</h2>
  <p>We received a request to reset your password. If you made this request,
     click the link below to confirm.</p>
  <p><a href="{url}">Confirm Password Reset</a></p>
  <p>This link is valid for 10 minutes only. If you did not request a
     password reset, you can safely ignore this email.</p>
</div>"#
    );
    ("Confirm Your Password Reset Request", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_bodies_embed_the_confirmation_url() {
        let url = "https://app.example.com/api/auth/verify?token=abc.def";

        let (subject, body) = verification_email(url);
        assert!(subject.contains("Verify"));
        assert!(body.contains(url));

        let (subject, body) = reset_email(url);
        assert!(subject.contains("Reset"));
        assert!(body.contains(url));
    }
}
