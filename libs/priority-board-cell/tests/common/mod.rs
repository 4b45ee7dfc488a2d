#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};

use priority_board_cell::services::applier;
use priority_board_cell::*;

pub const SLOT: &str = "board";

pub fn key(entity: &str) -> ItemKey {
    ItemKey::new(entity, SLOT)
}

pub fn over(entity: &str) -> Option<DragTarget> {
    Some(DragTarget::Item(key(entity)))
}

pub fn placeholder(column: &str) -> Option<DragTarget> {
    Some(DragTarget::Placeholder {
        column_id: ColumnId::from(column),
    })
}

/// `board(&[("A", "P1 P2"), ("B", "")])`: columns in display order, items in
/// position order.
pub fn board(columns: &[(&str, &str)]) -> Board {
    Board::new(
        columns
            .iter()
            .enumerate()
            .map(|(order, (id, entities))| {
                let mut column = Column::new(ColumnId::from(*id), order as i32, id.to_lowercase());
                column.items = entities
                    .split_whitespace()
                    .enumerate()
                    .map(|(pos, entity)| Item::new(entity, SLOT, ColumnId::from(*id), pos as u32))
                    .collect();
                column
            })
            .collect(),
    )
}

/// Entity ids of a column in position order, e.g. `["P1@0", "P3@1"]`.
pub fn ranks(board: &Board, column: &str) -> Vec<String> {
    board
        .column(&ColumnId::from(column))
        .map(|c| {
            c.items
                .iter()
                .map(|item| format!("{}@{}", item.entity_id, item.position))
                .collect()
        })
        .unwrap_or_default()
}

pub fn assert_invariants(board: &Board) {
    assert!(board.is_dense(), "positions must be dense: {:?}", board);
    assert!(board.has_unique_items(), "items must be unique: {:?}", board);
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    Accept,
    /// Applies everything but reports these entity ids as failed.
    ReportFailed(Vec<String>),
    TransportError,
}

/// Open by default; while closed, callers wait.
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    async fn wait(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// In-memory scheduling backend.
pub struct FakePersistence {
    server: Mutex<Board>,
    script: Mutex<VecDeque<SubmitBehavior>>,
    submissions: Mutex<Vec<SubmitMovesRequest>>,
    fetches_started: AtomicUsize,
    fetches_completed: AtomicUsize,
    fetch_error: Mutex<Option<String>>,
    /// Holds submits scripted to fail; `submit_gate` holds the rest.
    pub fail_gate: Gate,
    pub submit_gate: Gate,
    pub fetch_gate: Gate,
}

impl FakePersistence {
    pub fn new(initial: Board) -> Arc<Self> {
        Arc::new(Self {
            server: Mutex::new(initial),
            script: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            fetches_started: AtomicUsize::new(0),
            fetches_completed: AtomicUsize::new(0),
            fetch_error: Mutex::new(None),
            fail_gate: Gate::new(),
            submit_gate: Gate::new(),
            fetch_gate: Gate::new(),
        })
    }

    pub fn script(&self, behavior: SubmitBehavior) {
        self.script.lock().unwrap().push_back(behavior);
    }

    pub fn fail_fetches(&self, message: &str) {
        *self.fetch_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn server_board(&self) -> Board {
        self.server.lock().unwrap().clone()
    }

    pub fn set_server_board(&self, board: Board) {
        *self.server.lock().unwrap() = board;
    }

    pub fn submissions(&self) -> Vec<SubmitMovesRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn fetches_started(&self) -> usize {
        self.fetches_started.load(Ordering::SeqCst)
    }

    pub fn fetches_completed(&self) -> usize {
        self.fetches_completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BoardPersistence for FakePersistence {
    async fn submit_moves(
        &self,
        request: &SubmitMovesRequest,
    ) -> Result<SubmitMovesResponse, PriorityBoardError> {
        self.submissions.lock().unwrap().push(request.clone());
        // Behaviours bind to submits in arrival order.
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitBehavior::Accept);

        match behavior {
            SubmitBehavior::TransportError => self.fail_gate.wait().await,
            _ => self.submit_gate.wait().await,
        }

        let failed_ids = match behavior {
            SubmitBehavior::TransportError => {
                return Err(PriorityBoardError::Transport("connection reset".to_string()))
            }
            SubmitBehavior::Accept => Vec::new(),
            SubmitBehavior::ReportFailed(ids) => ids,
        };

        let moves = MoveSet::new(
            request
                .moves
                .iter()
                .map(|m| Move {
                    entity_id: m.id.clone(),
                    slot_id: m.slot_id.clone(),
                    column_id: m.column_id.clone(),
                    position: m.position,
                })
                .collect(),
        );
        {
            let mut server = self.server.lock().unwrap();
            let next = applier::apply(&server, &moves);
            *server = next;
        }

        Ok(SubmitMovesResponse {
            results: request
                .moves
                .iter()
                .map(|m| MoveResult {
                    id: m.id.clone(),
                    slot_id: Some(m.slot_id.clone()),
                    status: if failed_ids.contains(&m.id) {
                        MoveStatus::Failed
                    } else {
                        MoveStatus::Ok
                    },
                })
                .collect(),
        })
    }

    async fn fetch_board(&self, _filter: &FilterRange) -> Result<Board, PriorityBoardError> {
        self.fetches_started.fetch_add(1, Ordering::SeqCst);
        // Captured before waiting, like a response computed on old data.
        let snapshot = self.server_board();
        let error = self.fetch_error.lock().unwrap().clone();
        self.fetch_gate.wait().await;
        self.fetches_completed.fetch_add(1, Ordering::SeqCst);

        match error {
            Some(message) => Err(PriorityBoardError::Rejected {
                status: 503,
                message,
            }),
            None => Ok(snapshot),
        }
    }
}

pub fn engine_for(fake: &Arc<FakePersistence>) -> BoardEngine {
    engine_with_config(fake, EngineConfig::default())
}

pub fn engine_with_config(fake: &Arc<FakePersistence>, config: EngineConfig) -> BoardEngine {
    let persistence: Arc<dyn BoardPersistence> = fake.clone();
    BoardEngine::with_filter(config, persistence, FilterRange::around(Utc::now(), 7))
}

/// Engine hydrated from `initial`.
pub async fn hydrated(initial: Board) -> (BoardEngine, Arc<FakePersistence>) {
    let fake = FakePersistence::new(initial);
    let engine = engine_for(&fake);
    engine.hydrate().await.expect("hydrate");
    (engine, fake)
}

pub fn scenario_board() -> Board {
    board(&[("A", "P1 P2 P3"), ("B", "")])
}
