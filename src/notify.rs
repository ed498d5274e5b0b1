//! Notification sink
//!
//! Fire-and-forget desktop notifications on successful activation.
//! Failures are swallowed; a missing notifier must never affect rotation.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Receives activation announcements
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, title: &str, message: &str);
}

/// Notifies through the platform's desktop notification command
pub struct DesktopNotifier;

#[async_trait]
impl NotificationSink for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str) {
        debug!("Notification: {}: {}", title, message);

        #[cfg(target_os = "linux")]
        let result = Command::new("notify-send").arg(title).arg(message).status().await;

        #[cfg(target_os = "macos")]
        let result = Command::new("osascript")
            .arg("-e")
            .arg(format!(
                "display notification \"{}\" with title \"{}\"",
                message, title
            ))
            .status()
            .await;

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        let result: std::io::Result<std::process::ExitStatus> =
            Err(std::io::Error::other("no notifier on this platform"));

        if let Err(e) = result {
            debug!("Notification dropped: {}", e);
        }
    }
}
