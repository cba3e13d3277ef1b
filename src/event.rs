use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Messages posted by the gateway to connected pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// A new gateway version was installed
  UpdateAvailable,
  /// The gateway took control of this page
  ControllerChanged,
  /// The `upload-queue` background sync finished
  UploadQueueProcessed { timestamp: DateTime<Utc> },
}

/// Receiving end held by one connected page
pub struct ClientHandle {
  rx: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ClientHandle {
  /// Receive the next message; `None` once the registry is gone
  pub async fn next(&mut self) -> Option<ClientMessage> {
    self.rx.recv().await
  }

  /// Take a message if one is already waiting
  pub fn try_next(&mut self) -> Option<ClientMessage> {
    self.rx.try_recv().ok()
  }
}

/// Registry of connected pages
#[derive(Default)]
pub struct Clients {
  senders: Mutex<Vec<mpsc::UnboundedSender<ClientMessage>>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a page and return its message handle
  pub fn connect(&self) -> ClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Ok(mut senders) = self.senders.lock() {
      senders.push(tx);
    }
    ClientHandle { rx }
  }

  /// Post to every page; pages that went away are dropped. Returns how many
  /// pages received the message.
  pub fn post_all(&self, message: ClientMessage) -> usize {
    let Ok(mut senders) = self.senders.lock() else {
      return 0;
    };
    senders.retain(|tx| tx.send(message.clone()).is_ok());
    senders.len()
  }

  /// Number of connected pages
  pub fn len(&self) -> usize {
    self
      .senders
      .lock()
      .map(|mut senders| {
        senders.retain(|tx| !tx.is_closed());
        senders.len()
      })
      .unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
