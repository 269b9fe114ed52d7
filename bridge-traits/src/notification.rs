//! User Notification Abstraction

use async_trait::async_trait;

use crate::error::Result;

/// Posts short user-facing notifications.
///
/// - **iOS/Android**: local notifications
/// - **Desktop**: system tray or log output
#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<()>;
}
