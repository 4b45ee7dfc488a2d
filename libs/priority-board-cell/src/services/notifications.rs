use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::{Notification, NotificationLevel};

pub type NotificationReceiver = broadcast::Receiver<Notification>;

/// User-facing toasts. Fan-out over a broadcast channel plus a bounded log of
/// recent entries for polling clients.
pub struct NotificationService {
    sender: broadcast::Sender<Notification>,
    recent: Arc<RwLock<VecDeque<Notification>>>,
    capacity: usize,
}

impl NotificationService {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            recent: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn subscribe(&self) -> NotificationReceiver {
        self.sender.subscribe()
    }

    pub async fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.push(NotificationLevel::Info, message).await;
    }

    pub async fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.push(NotificationLevel::Warning, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.push(NotificationLevel::Error, message).await;
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Notification> {
        let recent = self.recent.read().await;
        recent.iter().rev().take(limit).cloned().collect()
    }

    async fn push(&self, level: NotificationLevel, message: String) {
        let notification = Notification {
            level,
            message,
            at: Utc::now(),
        };

        {
            let mut recent = self.recent.write().await;
            recent.push_back(notification.clone());
            while recent.len() > self.capacity {
                recent.pop_front();
            }
        }

        if let Err(e) = self.sender.send(notification) {
            // No subscribers; the recent log still has it.
            debug!("Notification not delivered: {}", e);
        }
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(100)
    }
}

/// `"1 update could not be applied"`, `"3 updates could not be applied"`.
pub fn partial_failure_message(failed: usize) -> String {
    if failed == 1 {
        "1 update could not be applied".to_string()
    } else {
        format!("{} updates could not be applied", failed)
    }
}
