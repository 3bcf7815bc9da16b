use crate::core::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Out-of-band delivery of activation codes.
#[async_trait]
pub trait ActivationMailer: Send + Sync {
    async fn send_activation_code(&self, email: &str, username: &str, code: &str) -> Result<()>;
}

/// Development mailer: records the delivery in the log instead of sending mail.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl ActivationMailer for LogMailer {
    async fn send_activation_code(&self, email: &str, username: &str, code: &str) -> Result<()> {
        info!(email, username, "activation code issued");
        debug!(email, code, "activation code contents");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub email: String,
    pub username: String,
    pub code: String,
}

/// Keeps every delivery in memory; handy for tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentCode>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentCode> {
        self.sent.lock().await.clone()
    }

    /// Most recent code sent to `email`
    pub async fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|sent| sent.email == email)
            .map(|sent| sent.code.clone())
    }
}

#[async_trait]
impl ActivationMailer for RecordingMailer {
    async fn send_activation_code(&self, email: &str, username: &str, code: &str) -> Result<()> {
        self.sent.lock().await.push(SentCode {
            email: email.to_string(),
            username: username.to_string(),
            code: code.to_string(),
        });
        Ok(())
    }
}
