use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

/// Outbound alert channels. Both operations are best-effort: callers log
/// failures and move on, delivery is never part of the ingestion path.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_sms(&self, destination: &str, text: &str) -> Result<(), NotifyError>;

    async fn send_email(
        &self,
        destination: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotifyError>;
}

/// Logs deliveries instead of sending them; stands in when no gateway is
/// wired up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_sms(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        tracing::info!(destination = %destination, text = %text, "sms alert (log only)");
        Ok(())
    }

    async fn send_email(
        &self,
        destination: &str,
        subject: &str,
        _html_body: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(destination = %destination, subject = %subject, "email alert (log only)");
        Ok(())
    }
}
