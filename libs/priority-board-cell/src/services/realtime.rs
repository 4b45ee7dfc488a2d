use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::services::invalidation::InvalidationCoordinator;
use crate::{PriorityBoardError, RealtimeEvent, ReconcileReason};

pub type RealtimeSender = broadcast::Sender<String>;
pub type RealtimeReceiver = broadcast::Receiver<String>;

/// Push channel for JSON-encoded realtime events.
pub struct RealtimeEventService {
    sender: RealtimeSender,
}

impl RealtimeEventService {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> RealtimeReceiver {
        self.sender.subscribe()
    }

    /// Returns how many listeners received the event.
    pub fn publish(&self, event: &RealtimeEvent) -> Result<usize, PriorityBoardError> {
        let message = serde_json::to_string(event)?;
        Ok(self.publish_raw(message))
    }

    pub fn publish_raw(&self, message: String) -> usize {
        match self.sender.send(message) {
            Ok(receivers) => receivers,
            Err(e) => {
                debug!("No realtime listeners: {}", e);
                0
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RealtimeEventService {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Clone for RealtimeEventService {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Feeds every realtime event into the same reconcile path a mutation settle
/// uses. Missed events (lag) also trigger a resync.
pub fn spawn_realtime_listener(
    coordinator: Arc<InvalidationCoordinator>,
    mut receiver: RealtimeReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let reason = match receiver.recv().await {
                Ok(raw) => match serde_json::from_str::<RealtimeEvent>(&raw) {
                    Ok(event) => {
                        debug!("Realtime event received: {:?}", event);
                        ReconcileReason::Realtime(event.kind())
                    }
                    Err(e) => {
                        warn!("Ignoring malformed realtime message: {}", e);
                        continue;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Realtime listener lagged, {} events skipped", skipped);
                    ReconcileReason::Manual
                }
                Err(RecvError::Closed) => {
                    info!("Realtime channel closed, listener stopping");
                    break;
                }
            };

            if let Err(e) = coordinator.reconcile(reason).await {
                error!("Realtime reconcile failed: {}", e);
            }
        }
    })
}
