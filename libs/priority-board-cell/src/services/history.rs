use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::services::store::Snapshot;
use crate::{Board, ItemKey, UndoStatus};

/// Bounded most-recent-first stack of pre-move snapshots.
///
/// The undo affordance is tracked as a timestamp: it stops being *visible*
/// after `visible_for`, but a pushed snapshot stays undoable until it is
/// popped, evicted or cleared.
pub struct HistoryManager {
    stack: VecDeque<Snapshot>,
    depth: usize,
    visible_for: Duration,
    shown_at: Option<DateTime<Utc>>,
    last_moved: Option<ItemKey>,
}

impl HistoryManager {
    pub fn new(depth: usize, visible_for: Duration) -> Self {
        let depth = depth.max(1);
        Self {
            stack: VecDeque::with_capacity(depth),
            depth,
            visible_for,
            shown_at: None,
            last_moved: None,
        }
    }

    pub fn push(&mut self, board: &Board, moved: Option<ItemKey>, now: DateTime<Utc>) {
        self.stack.push_front(Snapshot::new(board, now));
        while self.stack.len() > self.depth {
            self.stack.pop_back();
        }
        self.shown_at = Some(now);
        self.last_moved = moved;
        debug!("History depth now {}/{}", self.stack.len(), self.depth);
    }

    pub fn pop(&mut self) -> Option<Snapshot> {
        self.stack.pop_front()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.shown_at = None;
        self.last_moved = None;
    }

    pub fn is_available(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.is_available()
            && self
                .shown_at
                .map(|shown| now < shown + self.visible_for)
                .unwrap_or(false)
    }

    /// Expiry check for the affordance. Returns true when it was hidden by
    /// this call.
    pub fn hide_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        match self.shown_at {
            Some(shown) if now >= shown + self.visible_for => {
                self.shown_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.depth
    }

    pub fn status(&self, now: DateTime<Utc>) -> UndoStatus {
        UndoStatus {
            available: self.is_available(),
            visible: self.is_visible(now),
            depth: self.len(),
            capacity: self.capacity(),
            last_moved: self.last_moved.clone(),
        }
    }
}
