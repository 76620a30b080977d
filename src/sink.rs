//! Outbound notification delivery seam.
//!
//! The chat transport lives outside this crate; the monitor only needs
//! something that can take (recipient, message).

use async_trait::async_trait;
use log::{error, info};

use crate::notifier::NotifyError;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, recipient: &str, message: &str) -> Result<(), NotifyError>;
}

/// Sink that writes alerts to the process log. Used for CLI deployments and
/// as the default until a real transport is wired in.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        info!("alert for {recipient}:\n{message}");
        Ok(())
    }
}

/// Deliver `message` to every configured recipient. A failed delivery is
/// logged and does not stop the remaining ones.
pub async fn fan_out(sink: &dyn NotificationSink, recipients: &[String], message: &str) {
    for recipient in recipients {
        if let Err(e) = sink.deliver(recipient, message).await {
            error!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct CaptureSink {
        delivered: Mutex<Vec<(String, String)>>,
        fail_for: Option<String>,
    }

    impl CaptureSink {
        fn new() -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                fail_for: None,
            }
        }
    }

    #[async_trait]
    impl NotificationSink for CaptureSink {
        async fn deliver(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
            if self.fail_for.as_deref() == Some(recipient) {
                return Err(NotifyError::Delivery {
                    recipient: recipient.to_string(),
                    reason: "refused".to_string(),
                });
            }
            self.delivered
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_every_recipient() {
        let sink = CaptureSink::new();
        let admins = vec!["101".to_string(), "102".to_string(), "103".to_string()];
        fan_out(&sink, &admins, "down").await;
        assert_eq!(sink.delivered.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn one_failed_delivery_does_not_stop_the_rest() {
        let mut sink = CaptureSink::new();
        sink.fail_for = Some("102".to_string());
        let admins = vec!["101".to_string(), "102".to_string(), "103".to_string()];
        fan_out(&sink, &admins, "down").await;
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|(r, _)| r != "102"));
    }
}
