use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::services::{
    applier,
    dispatcher::MutationDispatcher,
    history::HistoryManager,
    invalidation::{InvalidationCoordinator, MutationId},
    notifications::NotificationService,
    persistence::BoardPersistence,
    planner,
    realtime::{spawn_realtime_listener, RealtimeEventService},
    store::{BoardReceiver, BoardStore},
};
use crate::{
    Board, DispatchKind, DispatchReport, DragPhase, DragTarget, EngineConfig, FilterRange,
    ItemKey, MoveSet, PriorityBoardError, ReconcileOutcome, ReconcileReason, UndoStatus,
};

/// Handle to a committed gesture (or undo) whose persistence runs in the
/// background.
#[derive(Debug)]
pub struct PendingMutation {
    gesture_id: Uuid,
    kind: DispatchKind,
    moves: usize,
    phase: watch::Receiver<DragPhase>,
    handle: JoinHandle<DispatchReport>,
}

impl PendingMutation {
    pub fn gesture_id(&self) -> Uuid {
        self.gesture_id
    }

    pub fn kind(&self) -> DispatchKind {
        self.kind
    }

    pub fn move_count(&self) -> usize {
        self.moves
    }

    pub fn phase(&self) -> DragPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<DragPhase> {
        self.phase.clone()
    }

    pub async fn settled(self) -> Result<DispatchReport, PriorityBoardError> {
        self.handle
            .await
            .map_err(|e| PriorityBoardError::Transport(format!("dispatch task failed: {}", e)))
    }
}

struct Interaction {
    phase: DragPhase,
    active: Option<ItemKey>,
}

impl Interaction {
    fn advance(&mut self, next: DragPhase) -> Result<(), PriorityBoardError> {
        if !self.phase.can_transition_to(&next) {
            return Err(PriorityBoardError::InvalidDragTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!("Drag phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = DragPhase::Idle;
        self.active = None;
    }
}

/// Entry point for the presentation layer: the published board, drag
/// callbacks, undo and its status signal.
#[derive(Clone)]
pub struct BoardEngine {
    store: Arc<BoardStore>,
    history: Arc<Mutex<HistoryManager>>,
    coordinator: Arc<InvalidationCoordinator>,
    dispatcher: Arc<MutationDispatcher>,
    notifications: Arc<NotificationService>,
    realtime: RealtimeEventService,
    interaction: Arc<Mutex<Interaction>>,
}

impl BoardEngine {
    pub fn new(config: EngineConfig, persistence: Arc<dyn BoardPersistence>) -> Self {
        let filter = FilterRange::around(Utc::now(), config.filter_window_days);
        Self::with_filter(config, persistence, filter)
    }

    pub fn with_filter(
        config: EngineConfig,
        persistence: Arc<dyn BoardPersistence>,
        filter: FilterRange,
    ) -> Self {
        let store = Arc::new(BoardStore::default());
        let notifications = Arc::new(NotificationService::new(config.notification_capacity));
        let coordinator = Arc::new(InvalidationCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&persistence),
            filter,
        ));
        let dispatcher = Arc::new(MutationDispatcher::new(
            persistence,
            Arc::clone(&coordinator),
            Arc::clone(&notifications),
        ));
        let history = HistoryManager::new(
            config.history_depth,
            Duration::seconds(config.undo_visible_seconds),
        );
        let realtime = RealtimeEventService::new(config.realtime_capacity);

        Self {
            store,
            history: Arc::new(Mutex::new(history)),
            coordinator,
            dispatcher,
            notifications,
            realtime,
            interaction: Arc::new(Mutex::new(Interaction {
                phase: DragPhase::Idle,
                active: None,
            })),
        }
    }

    pub fn board(&self) -> Arc<Board> {
        self.store.get()
    }

    pub fn board_version(&self) -> u64 {
        self.store.version()
    }

    pub fn subscribe(&self) -> BoardReceiver {
        self.store.subscribe()
    }

    pub fn coordinator(&self) -> Arc<InvalidationCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn notifications(&self) -> Arc<NotificationService> {
        Arc::clone(&self.notifications)
    }

    pub fn realtime(&self) -> &RealtimeEventService {
        &self.realtime
    }

    /// Initial load at mount.
    pub async fn hydrate(&self) -> Result<ReconcileOutcome, PriorityBoardError> {
        self.coordinator.reconcile(ReconcileReason::Hydrate).await
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome, PriorityBoardError> {
        self.coordinator.reconcile(ReconcileReason::Manual).await
    }

    /// Switches the fetch window and re-hydrates.
    pub async fn change_filter(
        &self,
        filter: FilterRange,
    ) -> Result<ReconcileOutcome, PriorityBoardError> {
        self.coordinator.set_filter(filter).await;
        self.coordinator.reconcile(ReconcileReason::Hydrate).await
    }

    pub fn start_realtime(&self) -> JoinHandle<()> {
        spawn_realtime_listener(Arc::clone(&self.coordinator), self.realtime.subscribe())
    }

    pub async fn phase(&self) -> DragPhase {
        self.interaction.lock().await.phase
    }

    pub async fn on_drag_start(&self, active: ItemKey) -> Result<(), PriorityBoardError> {
        if self.store.get().locate(&active).is_none() {
            return Err(PriorityBoardError::ItemNotFound(active.to_string()));
        }

        let mut interaction = self.interaction.lock().await;
        interaction.advance(DragPhase::Dragging)?;
        debug!("Drag started for {}", active);
        interaction.active = Some(active);
        Ok(())
    }

    pub async fn on_drag_cancel(&self) -> Result<(), PriorityBoardError> {
        let mut interaction = self.interaction.lock().await;
        if interaction.phase == DragPhase::Idle {
            return Ok(());
        }
        interaction.advance(DragPhase::Cancelled)?;
        interaction.reset();
        debug!("Drag cancelled");
        Ok(())
    }

    /// Plans against the live board, snapshots it, publishes the optimistic
    /// result and starts persistence. The engine is back to `Idle` when this
    /// returns; the gesture continues in the returned handle.
    #[instrument(skip(self))]
    pub async fn on_drag_end(
        &self,
        active: ItemKey,
        over: Option<DragTarget>,
    ) -> Result<Option<PendingMutation>, PriorityBoardError> {
        let mut interaction = self.interaction.lock().await;
        interaction.advance(DragPhase::Dropped)?;

        if interaction.active.as_ref() != Some(&active) {
            let started = interaction
                .active
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            interaction.advance(DragPhase::Cancelled)?;
            interaction.reset();
            warn!("Drag ended for {} but started for {}", active, started);
            return Err(PriorityBoardError::ActiveItemMismatch {
                started,
                ended: active.to_string(),
            });
        }

        let Some(over) = over else {
            interaction.advance(DragPhase::Cancelled)?;
            interaction.reset();
            debug!("Dropped outside any target");
            return Ok(None);
        };

        interaction.advance(DragPhase::Planning)?;
        let now = Utc::now();

        let committed = {
            let _gate = self.store.write_gate().await;
            let current = self.store.get();
            let moves = planner::plan(&current, &active, &over);

            if moves.is_empty() {
                None
            } else {
                self.history
                    .lock()
                    .await
                    .push(&current, Some(active.clone()), now);
                let next = applier::apply(&current, &moves);
                let id = self.coordinator.begin_mutation(&moves).await;
                self.coordinator.cancel_in_flight().await;
                let version = self.store.publish(next);
                Some((id, moves, version))
            }
        };

        let Some((id, moves, version)) = committed else {
            interaction.advance(DragPhase::Cancelled)?;
            interaction.reset();
            debug!("Drop of {} is a no-op", active);
            return Ok(None);
        };

        interaction.advance(DragPhase::OptimisticApplied)?;
        interaction.reset();
        drop(interaction);

        info!(
            "Moved {} optimistically ({} position updates, version {})",
            active,
            moves.len(),
            version
        );
        Ok(Some(self.spawn_dispatch(id, moves, DispatchKind::Move)))
    }

    /// Restores the most recent snapshot and persists it as a full
    /// re-synchronisation. Only one level is ever honoured: the rest of the
    /// stack is cleared whatever the outcome.
    #[instrument(skip(self))]
    pub async fn undo(&self) -> Option<PendingMutation> {
        let (id, moves) = {
            let _gate = self.store.write_gate().await;
            let mut history = self.history.lock().await;
            let Some(snapshot) = history.pop() else {
                debug!("Nothing to undo");
                return None;
            };
            history.clear();
            drop(history);

            let moves = MoveSet::full_sync(snapshot.board());
            let id = self.coordinator.begin_mutation(&moves).await;
            self.coordinator.cancel_in_flight().await;
            let version = self.store.restore(&snapshot);
            info!(
                "Restored snapshot taken at {} (version {})",
                snapshot.taken_at(),
                version
            );
            (id, moves)
        };

        Some(self.spawn_dispatch(id, moves, DispatchKind::Undo))
    }

    pub async fn undo_status(&self, now: DateTime<Utc>) -> UndoStatus {
        self.history.lock().await.status(now)
    }

    /// Scheduled expiry of the undo affordance; undo itself stays callable.
    pub async fn expire_undo_affordance(&self, now: DateTime<Utc>) -> bool {
        self.history.lock().await.hide_if_expired(now)
    }

    /// Background tick hiding the undo affordance once its window passes.
    pub fn spawn_undo_expiry(&self, period: std::time::Duration) -> JoinHandle<()> {
        let history = Arc::clone(&self.history);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if history.lock().await.hide_if_expired(Utc::now()) {
                    debug!("Undo affordance hidden");
                }
            }
        })
    }

    /// The mutation must already be registered as `id` with `begin_mutation`.
    fn spawn_dispatch(&self, id: MutationId, moves: MoveSet, kind: DispatchKind) -> PendingMutation {
        let gesture_id = Uuid::new_v4();
        let move_count = moves.len();
        let (phase_tx, phase_rx) = watch::channel(DragPhase::OptimisticApplied);
        let dispatcher = Arc::clone(&self.dispatcher);

        let handle = tokio::spawn(async move {
            phase_tx.send_replace(DragPhase::Persisting);
            let report = dispatcher.dispatch_registered(id, &moves, kind).await;
            phase_tx.send_replace(DragPhase::Reconciled);
            debug!(
                "Gesture {} settled: {:?} / {:?}",
                gesture_id, report.outcome, report.reconcile
            );
            report
        });

        PendingMutation {
            gesture_id,
            kind,
            moves: move_count,
            phase: phase_rx,
            handle,
        }
    }
}
