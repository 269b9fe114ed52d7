//! Notifications routed to the tracing log

use async_trait::async_trait;
use bridge_traits::{error::Result, notification::UserNotifier};
use tracing::info;

/// Desktop notifier that writes notifications to the log.
///
/// Headless desktop runs have no notification center; the log line is the
/// user-visible surface.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UserNotifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        info!(target: "asset_sync::notification", title = title, "{}", body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        LogNotifier::new()
            .notify("Photo backup", "Starting upload of 3 assets")
            .await
            .unwrap();
    }
}
