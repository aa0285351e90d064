//! Verification and reset email delivery.
//!
//! Auth flows never talk to SMTP directly. They hand a message to a [`Notifier`],
//! whose production implementation ([`EmailDispatcher`]) queues it for a background
//! worker that retries failed deliveries with exponential backoff and jitter.
//! Delivery is best effort: a failure is logged and never undoes the request that
//! triggered it.

pub mod dispatcher;
pub mod smtp;
pub mod templates;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

pub use dispatcher::{EmailDispatcher, EmailWorkerConfig};
pub use smtp::{SmtpConfig, SmtpEmailSender};
pub use templates::EmailTemplates;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Delivery transport used by the dispatcher worker.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the worker can retry it.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            body = %message.text_body,
            "email send stub"
        );
        Ok(())
    }
}

/// Contract the auth core uses to reach users by email.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification_email(&self, email: &str, link_token: &str, otp: &str)
        -> Result<()>;

    async fn send_password_reset_email(&self, email: &str, token: &str) -> Result<()>;
}
