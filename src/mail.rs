use std::sync::Mutex;

use anyhow::Context;
use axum::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use crate::config::MailConfig;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> anyhow::Result<()>;
}

/// Posts each mail as JSON to an HTTP mail API.
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpMailer {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, mail), fields(to = %mail.to))]
    async fn send(&self, mail: Mail) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&mail)
            .send()
            .await
            .context("mail api request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("mail api returned {status}: {body}");
        }
        Ok(())
    }
}

/// Writes mails to the log only.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, text = %mail.text, "mail not delivered (no mail api configured)");
        Ok(())
    }
}

/// Keeps every mail in an outbox; optionally fails every send.
#[derive(Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<Mail>>,
    failing: bool,
}

impl MemoryMailer {
    pub fn failing() -> Self {
        Self { failing: true, ..Default::default() }
    }

    pub fn outbox(&self) -> Vec<Mail> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Mail> {
        self.outbox().pop()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, mail: Mail) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("mail transport unavailable");
        }
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(mail);
        }
        Ok(())
    }
}

/// Account emails: greeting by first name, a message and a callback URL.
pub struct Email<'a> {
    to: &'a str,
    first_name: &'a str,
    url: &'a str,
    from: &'a str,
}

impl<'a> Email<'a> {
    pub fn new(config: &'a MailConfig, name: &'a str, to: &'a str, url: &'a str) -> Self {
        Self {
            to,
            first_name: name.split_whitespace().next().unwrap_or(name),
            url,
            from: &config.from,
        }
    }

    fn compose(&self, subject: &str, message: &str) -> Mail {
        Mail {
            from: self.from.to_string(),
            to: self.to.to_string(),
            subject: subject.to_string(),
            text: format!(
                "Hi {},\n\n{} {}\n\nThank you, see you on MemeHub!",
                self.first_name, message, self.url
            ),
        }
    }

    pub async fn send_welcome(&self, mailer: &dyn Mailer) -> anyhow::Result<()> {
        let mail = self.compose(
            "Account Activation",
            "Please activate your account via the URL below (it expires in 12 hours). Activation URL:",
        );
        mailer.send(mail).await
    }

    pub async fn send_password_reset(&self, mailer: &dyn Mailer) -> anyhow::Result<()> {
        let mail = self.compose(
            "Your password reset token (valid for only 10 minutes)",
            "Reset your password by sending a PATCH request with password and passwordConfirm. Reset URL:",
        );
        mailer.send(mail).await
    }
}
