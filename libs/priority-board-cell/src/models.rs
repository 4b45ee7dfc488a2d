use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::AppConfig;

/// Identifier of a priority bucket on the board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(pub String);

impl ColumnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Drag/undo identity of an item. One entity can own several slots, each
/// positioned independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub entity_id: String,
    pub slot_id: String,
}

impl ItemKey {
    pub fn new(entity_id: impl Into<String>, slot_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            slot_id: slot_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.slot_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub entity_id: String,
    pub slot_id: String,
    pub column_id: ColumnId,
    pub position: u32,
}

impl Item {
    pub fn new(
        entity_id: impl Into<String>,
        slot_id: impl Into<String>,
        column_id: ColumnId,
        position: u32,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            slot_id: slot_id.into(),
            column_id,
            position,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.entity_id.clone(), self.slot_id.clone())
    }

    pub fn matches(&self, key: &ItemKey) -> bool {
        self.entity_id == key.entity_id && self.slot_id == key.slot_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub display_order: i32,
    pub tag: String,
    pub items: Vec<Item>,
}

impl Column {
    pub fn new(id: ColumnId, display_order: i32, tag: impl Into<String>) -> Self {
        Self {
            id,
            display_order,
            tag: tag.into(),
            items: Vec::new(),
        }
    }

    /// Positions are exactly `0..n` in item order.
    pub fn is_dense(&self) -> bool {
        self.items
            .iter()
            .enumerate()
            .all(|(idx, item)| item.position as usize == idx && item.column_id == self.id)
    }

    /// Rewrites every position to match the current item order.
    pub fn rerank(&mut self) {
        for (idx, item) in self.items.iter_mut().enumerate() {
            item.position = idx as u32;
            item.column_id = self.id.clone();
        }
    }
}

/// Ordered priority columns, each owning its ordered items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub columns: Vec<Column>,
}

impl Board {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column(&self, id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == id)
    }

    pub fn column_index(&self, id: &ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| &c.id == id)
    }

    /// Returns `(column index, item index)` of the item.
    pub fn locate(&self, key: &ItemKey) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(col_idx, column)| {
            column
                .items
                .iter()
                .position(|item| item.matches(key))
                .map(|item_idx| (col_idx, item_idx))
        })
    }

    pub fn item(&self, key: &ItemKey) -> Option<&Item> {
        self.locate(key)
            .map(|(col_idx, item_idx)| &self.columns[col_idx].items[item_idx])
    }

    pub fn item_count(&self) -> usize {
        self.columns.iter().map(|c| c.items.len()).sum()
    }

    pub fn is_dense(&self) -> bool {
        self.columns.iter().all(Column::is_dense)
    }

    /// Every `(entity_id, slot_id)` pair appears at most once.
    pub fn has_unique_items(&self) -> bool {
        let mut seen = HashSet::new();
        self.columns
            .iter()
            .flat_map(|c| c.items.iter())
            .all(|item| seen.insert(item.key()))
    }

    /// Sorts columns by display order and items by position, then re-ranks
    /// densely. The flag reports whether any item position had to change.
    pub fn normalized(mut self) -> (Self, bool) {
        self.columns.sort_by_key(|c| c.display_order);
        let mut repaired = false;
        for column in &mut self.columns {
            column.items.sort_by_key(|item| item.position);
            if !column.is_dense() {
                column.rerank();
                repaired = true;
            }
        }
        (self, repaired)
    }
}

/// What the pointer is over when a drag ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DragTarget {
    Item(ItemKey),
    /// The empty-state drop zone of a column.
    Placeholder { column_id: ColumnId },
}

/// Target assignment for one item; the unit sent to persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub entity_id: String,
    pub slot_id: String,
    pub column_id: ColumnId,
    pub position: u32,
}

impl Move {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.entity_id.clone(), self.slot_id.clone())
    }

    pub fn into_item(self) -> Item {
        Item {
            entity_id: self.entity_id,
            slot_id: self.slot_id,
            column_id: self.column_id,
            position: self.position,
        }
    }
}

impl From<&Item> for Move {
    fn from(item: &Item) -> Self {
        Self {
            entity_id: item.entity_id.clone(),
            slot_id: item.slot_id.clone(),
            column_id: item.column_id.clone(),
            position: item.position,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoveSet {
    moves: Vec<Move>,
}

impl MoveSet {
    pub fn new(moves: Vec<Move>) -> Self {
        Self { moves }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Every item of the board at its current column and position.
    pub fn full_sync(board: &Board) -> Self {
        Self::new(
            board
                .columns
                .iter()
                .flat_map(|c| c.items.iter())
                .map(Move::from)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Move> {
        self.moves.iter()
    }

}

impl<'a> IntoIterator for &'a MoveSet {
    type Item = &'a Move;
    type IntoIter = std::slice::Iter<'a, Move>;

    fn into_iter(self) -> Self::IntoIter {
        self.moves.iter()
    }
}

// Persistence wire format

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub id: String,
    pub position: u32,
    pub column_id: ColumnId,
    pub slot_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitMovesRequest {
    pub moves: Vec<MoveRequest>,
}

impl From<&MoveSet> for SubmitMovesRequest {
    fn from(set: &MoveSet) -> Self {
        Self {
            moves: set
                .iter()
                .map(|m| MoveRequest {
                    id: m.entity_id.clone(),
                    position: m.position,
                    column_id: m.column_id.clone(),
                    slot_id: m.slot_id.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub id: String,
    #[serde(default)]
    pub slot_id: Option<String>,
    pub status: MoveStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitMovesResponse {
    pub results: Vec<MoveResult>,
}

impl SubmitMovesResponse {
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == MoveStatus::Failed)
            .count()
    }
}

/// Date window the board is fetched for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl FilterRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// `days` either side of `now`.
    pub fn around(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            from: now - Duration::days(days),
            to: now + Duration::days(days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConfig {
    pub id: ColumnId,
    pub display_order: i32,
    pub tag: String,
}

/// Board as returned by the scheduling API: column configuration plus a flat
/// item list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPayload {
    pub columns: Vec<ColumnConfig>,
    pub items: Vec<Item>,
}

impl BoardPayload {
    /// Groups items under their columns. Items naming an unknown column are
    /// returned separately.
    pub fn into_board(self) -> (Board, Vec<Item>) {
        let mut columns: Vec<Column> = self
            .columns
            .into_iter()
            .map(|c| Column::new(c.id, c.display_order, c.tag))
            .collect();
        let mut orphans = Vec::new();

        for item in self.items {
            match columns.iter_mut().find(|c| c.id == item.column_id) {
                Some(column) => column.items.push(item),
                None => orphans.push(item),
            }
        }

        (Board::new(columns), orphans)
    }
}

/// Lifecycle of a single drag gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragPhase {
    Idle,
    Dragging,
    Dropped,
    Planning,
    OptimisticApplied,
    Persisting,
    Reconciled,
    Cancelled,
}

impl DragPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DragPhase::Reconciled | DragPhase::Cancelled)
    }

    pub fn can_transition_to(&self, target: &DragPhase) -> bool {
        use DragPhase::*;
        match (self, target) {
            (Idle, Dragging) => true,
            (Dragging, Dropped) => true,
            (Dragging, Cancelled) => true,
            (Dropped, Planning) => true,
            (Dropped, Cancelled) => true,
            (Planning, OptimisticApplied) => true,
            (Planning, Cancelled) => true,
            (OptimisticApplied, Persisting) => true,
            (Persisting, Reconciled) => true,
            // Undo enters the machine at planning.
            (Idle, Planning) => true,
            (Reconciled, Idle) | (Cancelled, Idle) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Move,
    Undo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Applied,
    PartiallyApplied { failed: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub batch_id: Uuid,
    pub kind: DispatchKind,
    pub submitted: usize,
    pub outcome: DispatchOutcome,
    pub results: Vec<MoveResult>,
    pub reconcile: ReconcileOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeEventKind {
    ExternalConfirmationResolved,
    EntityUpdated,
}

/// Push events from the realtime collaborator. Both kinds reconcile the same
/// way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    ExternalConfirmationResolved { entity_id: String },
    EntityUpdated { entity_id: String },
}

impl RealtimeEvent {
    pub fn kind(&self) -> RealtimeEventKind {
        match self {
            RealtimeEvent::ExternalConfirmationResolved { .. } => {
                RealtimeEventKind::ExternalConfirmationResolved
            }
            RealtimeEvent::EntityUpdated { .. } => RealtimeEventKind::EntityUpdated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "event", rename_all = "snake_case")]
pub enum ReconcileReason {
    Hydrate,
    MutationSettled,
    Rollback,
    Realtime(RealtimeEventKind),
    Manual,
}

impl ReconcileReason {
    /// Forced reconciles read even while mutations are still in flight.
    pub fn is_forced(&self) -> bool {
        matches!(self, ReconcileReason::Hydrate | ReconcileReason::Rollback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Canonical board published at this store version.
    Reconciled { version: u64 },
    /// Stale reads cancelled; the fresh read waits for in-flight mutations.
    Deferred { pending_mutations: usize },
    /// A newer write or cancellation overtook the read.
    Superseded,
    /// Stale reads cancelled, local state kept on purpose.
    CancelledOnly,
    /// The fresh read failed; the published board was kept.
    ReadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoStatus {
    pub available: bool,
    pub visible: bool,
    pub depth: usize,
    pub capacity: usize,
    pub last_moved: Option<ItemKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub history_depth: usize,
    pub undo_visible_seconds: i64,
    pub filter_window_days: i64,
    pub notification_capacity: usize,
    pub realtime_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_depth: 10,
            undo_visible_seconds: 20,
            filter_window_days: 14,
            notification_capacity: 100,
            realtime_capacity: 256,
        }
    }
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            history_depth: config.history_depth,
            undo_visible_seconds: config.undo_visible_seconds,
            filter_window_days: config.board_window_days,
            ..Self::default()
        }
    }
}

// HTTP request bodies

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DragEndRequest {
    pub active: ItemKey,
    #[serde(default)]
    pub over: Option<DragTarget>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsQuery {
    pub limit: Option<usize>,
}
