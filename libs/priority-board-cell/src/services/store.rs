use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::debug;

use crate::Board;

pub type BoardReceiver = watch::Receiver<Arc<Board>>;

/// Deep, independent copy of the board taken for undo. Never mutated.
#[derive(Debug, Clone)]
pub struct Snapshot {
    board: Arc<Board>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(board: &Board, taken_at: DateTime<Utc>) -> Self {
        Self {
            board: Arc::new(board.clone()),
            taken_at,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

/// The single published board. Readers get atomic `Arc` swaps, writers
/// serialise through the write gate.
pub struct BoardStore {
    sender: watch::Sender<Arc<Board>>,
    version: AtomicU64,
    write_gate: Mutex<()>,
}

impl BoardStore {
    pub fn new(initial: Board) -> Self {
        let (sender, _) = watch::channel(Arc::new(initial));
        Self {
            sender,
            version: AtomicU64::new(0),
            write_gate: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Arc<Board> {
        self.sender.borrow().clone()
    }

    /// Replaces the published board and returns the new version.
    pub fn publish(&self, next: Board) -> u64 {
        self.sender.send_replace(Arc::new(next));
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Published board version {}", version);
        version
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> BoardReceiver {
        self.sender.subscribe()
    }

    pub fn restore(&self, snapshot: &Snapshot) -> u64 {
        self.publish(snapshot.board().clone())
    }

    /// Held across read-modify-publish sequences.
    pub async fn write_gate(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new(Board::default())
    }
}
