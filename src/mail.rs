use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub const USER_INVITATION_TEMPLATE: &str = "user_invitations";

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> anyhow::Result<()>;
}

#[derive(Debug, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

/// Fills `{{key}}` placeholders in one of the bundled templates.
pub fn render(template: &str, data: &Value) -> anyhow::Result<RenderedMail> {
    let (subject, body) = match template {
        USER_INVITATION_TEMPLATE => (
            "Activate your Exchanger account",
            "Welcome to Exchanger!\n\n\
             Activate your account by sending the token below to PUT /v1/tokens/activate:\n\n\
             {{activationToken}}\n\n\
             The token can be used once and expires in a few days.",
        ),
        other => anyhow::bail!("unknown mail template {other:?}"),
    };

    let fill = |text: &str| -> anyhow::Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            let end = rest[start..]
                .find("}}")
                .map(|i| start + i)
                .context("unterminated placeholder")?;
            let key = &rest[start + 2..end];
            let value = match data.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => anyhow::bail!("missing template value {key:?}"),
            };
            out.push_str(&rest[..start]);
            out.push_str(&value);
            rest = &rest[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    };

    Ok(RenderedMail {
        subject: fill(subject)?,
        body: fill(body)?,
    })
}

/// Renders mail and writes it to the log instead of an SMTP relay.
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> anyhow::Result<()> {
        let mail = render(template, data)?;
        info!(
            from = %self.sender,
            to = %recipient,
            subject = %mail.subject,
            body = %mail.body,
            "mail sent"
        );
        Ok(())
    }
}

/// Retries a failing delivery a fixed number of times.
pub struct RetryingMailer<M> {
    inner: M,
    attempts: u32,
    pause: Duration,
}

impl<M: Mailer> RetryingMailer<M> {
    pub fn new(inner: M, attempts: u32, pause: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            pause,
        }
    }
}

#[async_trait]
impl<M: Mailer> Mailer for RetryingMailer<M> {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> anyhow::Result<()> {
        let mut attempt = 1;
        loop {
            match self.inner.send(recipient, template, data).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.attempts => {
                    warn!(error = %e, attempt, "mail delivery failed; retrying");
                    attempt += 1;
                    tokio::time::sleep(self.pause).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("mail to {recipient} failed after {attempt} attempts")
                    })
                }
            }
        }
    }
}
