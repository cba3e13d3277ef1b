//! Notification surface for push events.

/// A notification as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Notifications sharing a tag replace each other
  pub tag: String,
  pub require_interaction: bool,
}

impl Notification {
  /// The notification shown for a push message.
  pub fn for_push(data: Option<&str>) -> Self {
    Self {
      title: "KYC Lite".to_string(),
      body: data
        .filter(|d| !d.is_empty())
        .unwrap_or("KYC verification update")
        .to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
      tag: "kyc-notification".to_string(),
      require_interaction: true,
    }
  }
}

/// Where notifications and window requests go.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification);

  fn close(&self, tag: &str);

  /// Open the URL, or focus a window already showing it.
  fn open_window(&self, url: &str);
}

/// Notifier that only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) {
    tracing::info!(
      tag = %notification.tag,
      title = %notification.title,
      "Notification: {}",
      notification.body
    );
  }

  fn close(&self, tag: &str) {
    tracing::debug!(%tag, "Notification closed");
  }

  fn open_window(&self, url: &str) {
    tracing::info!(%url, "Open window");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_push_notification_body() {
    assert_eq!(Notification::for_push(Some("Approved")).body, "Approved");
    assert_eq!(Notification::for_push(None).body, "KYC verification update");
    assert_eq!(Notification::for_push(Some("")).body, "KYC verification update");
  }
}
