use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use crate::services::applier;
use crate::services::persistence::BoardPersistence;
use crate::services::store::BoardStore;
use crate::{Board, FilterRange, MoveSet, PriorityBoardError, ReconcileOutcome, ReconcileReason};

/// Identity of a cached read. The board owns one; panels fed by the same
/// collection register theirs as dependents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn board() -> Self {
        Self::new("priority-board")
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct InFlightRead {
    id: u64,
    handle: AbortHandle,
}

/// Handle of a mutation counted by [`InvalidationCoordinator::begin_mutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

/// Mutations whose optimistic state is published but not yet settled, in
/// registration order.
#[derive(Default)]
struct PendingMutations {
    next_id: u64,
    unsettled: BTreeMap<MutationId, MoveSet>,
    resync_owed: bool,
}

#[derive(Default)]
struct QueryRegistry {
    dependents: HashSet<QueryKey>,
    in_flight: HashMap<QueryKey, Vec<InFlightRead>>,
}

/// Single reconciliation path for mutation settles and realtime pushes.
///
/// Every optimistic write, every settled mutation and every reconcile bumps
/// the read epoch; a read is only accepted if the epoch it started under is
/// still current when it returns. Moves of still unsettled mutations are
/// replayed over any accepted read.
pub struct InvalidationCoordinator {
    store: Arc<BoardStore>,
    persistence: Arc<dyn BoardPersistence>,
    board_key: QueryKey,
    filter: RwLock<FilterRange>,
    registry: Mutex<QueryRegistry>,
    epoch: AtomicU64,
    next_read_id: AtomicU64,
    pending: Mutex<PendingMutations>,
    invalidations: broadcast::Sender<QueryKey>,
}

impl InvalidationCoordinator {
    pub fn new(
        store: Arc<BoardStore>,
        persistence: Arc<dyn BoardPersistence>,
        filter: FilterRange,
    ) -> Self {
        let (invalidations, _) = broadcast::channel(64);
        Self {
            store,
            persistence,
            board_key: QueryKey::board(),
            filter: RwLock::new(filter),
            registry: Mutex::new(QueryRegistry::default()),
            epoch: AtomicU64::new(0),
            next_read_id: AtomicU64::new(0),
            pending: Mutex::new(PendingMutations::default()),
            invalidations,
        }
    }

    pub fn board_key(&self) -> &QueryKey {
        &self.board_key
    }

    /// Declares a query that must be cancelled and invalidated together with
    /// the board. Returns false if it was already known.
    pub async fn register_dependent(&self, key: QueryKey) -> bool {
        if key == self.board_key {
            return false;
        }
        let mut registry = self.registry.lock().await;
        let added = registry.dependents.insert(key.clone());
        if added {
            debug!("Registered dependent query {}", key);
        }
        added
    }

    pub async fn unregister_dependent(&self, key: &QueryKey) -> bool {
        let mut registry = self.registry.lock().await;
        if let Some(reads) = registry.in_flight.remove(key) {
            reads.iter().for_each(|read| read.handle.abort());
        }
        registry.dependents.remove(key)
    }

    pub async fn dependents(&self) -> Vec<QueryKey> {
        let registry = self.registry.lock().await;
        registry.dependents.iter().cloned().collect()
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<QueryKey> {
        self.invalidations.subscribe()
    }

    pub async fn filter(&self) -> FilterRange {
        self.filter.read().await.clone()
    }

    pub async fn set_filter(&self, filter: FilterRange) {
        *self.filter.write().await = filter;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub async fn pending_mutations(&self) -> usize {
        self.pending.lock().await.unsettled.len()
    }

    /// True while a deferred resync has not been performed yet.
    pub async fn resync_owed(&self) -> bool {
        self.pending.lock().await.resync_owed
    }

    /// Counts a mutation as in flight. Call before its optimistic board is
    /// published.
    pub async fn begin_mutation(&self, moves: &MoveSet) -> MutationId {
        let mut pending = self.pending.lock().await;
        let id = MutationId(pending.next_id);
        pending.next_id += 1;
        pending.unsettled.insert(id, moves.clone());
        id
    }

    /// Marks a mutation settled and returns how many are still in flight.
    /// Unknown ids are ignored.
    pub async fn end_mutation(&self, id: MutationId) -> usize {
        let mut pending = self.pending.lock().await;
        if pending.unsettled.remove(&id).is_some() {
            // A read taken before the server applied this mutation is stale.
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        pending.unsettled.len()
    }

    /// Runs `read` as a cancellable task registered under `key`.
    pub async fn track_read<T, F>(&self, key: QueryKey, read: F) -> Result<T, PriorityBoardError>
    where
        F: Future<Output = Result<T, PriorityBoardError>> + Send + 'static,
        T: Send + 'static,
    {
        let read_id = self.next_read_id.fetch_add(1, Ordering::SeqCst);
        let handle = {
            let mut registry = self.registry.lock().await;
            if key != self.board_key && !registry.dependents.contains(&key) {
                return Err(PriorityBoardError::UnregisteredQuery(key.to_string()));
            }
            let handle = tokio::spawn(read);
            registry
                .in_flight
                .entry(key.clone())
                .or_default()
                .push(InFlightRead {
                    id: read_id,
                    handle: handle.abort_handle(),
                });
            handle
        };

        let result = handle.await;

        {
            let mut registry = self.registry.lock().await;
            if let Some(reads) = registry.in_flight.get_mut(&key) {
                reads.retain(|read| read.id != read_id);
                if reads.is_empty() {
                    registry.in_flight.remove(&key);
                }
            }
        }

        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(PriorityBoardError::ReadCancelled(key.to_string())),
            Err(e) => Err(PriorityBoardError::Transport(format!("read task failed: {}", e))),
        }
    }

    pub async fn in_flight_reads(&self) -> usize {
        let registry = self.registry.lock().await;
        registry.in_flight.values().map(Vec::len).sum()
    }

    /// Aborts all in-flight reads for the board and its dependents and
    /// invalidates any read result not yet accepted.
    pub async fn cancel_in_flight(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let mut registry = self.registry.lock().await;
        let mut keys: Vec<QueryKey> = registry.dependents.iter().cloned().collect();
        keys.push(self.board_key.clone());

        let mut cancelled = 0;
        for key in keys {
            if let Some(reads) = registry.in_flight.remove(&key) {
                for read in reads {
                    read.handle.abort();
                    cancelled += 1;
                }
            }
        }

        if cancelled > 0 {
            debug!("Cancelled {} in-flight reads", cancelled);
        }
        cancelled
    }

    /// Cancel stale reads, then replace the published board with a fresh
    /// canonical read.
    ///
    /// Unforced reasons are deferred while mutations are in flight; the
    /// resync is then owed and performed when the last one settles.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        reason: ReconcileReason,
    ) -> Result<ReconcileOutcome, PriorityBoardError> {
        self.cancel_in_flight().await;

        // Epoch before the pending check: a mutation registered after the
        // check always bumps the epoch after this point.
        let epoch = self.epoch();
        {
            let mut pending = self.pending.lock().await;
            let in_flight = pending.unsettled.len();
            if in_flight > 0 && !reason.is_forced() {
                pending.resync_owed = true;
                debug!("Deferring resync, {} mutations still in flight", in_flight);
                return Ok(ReconcileOutcome::Deferred {
                    pending_mutations: in_flight,
                });
            }
        }

        self.read_and_publish(epoch, None).await
    }

    /// Settles a failed undo. The restored board is kept; if a resync was
    /// deferred meanwhile it runs now with the undo's moves laid over it.
    pub async fn settle_failed_undo(
        &self,
        undo: &MoveSet,
    ) -> Result<ReconcileOutcome, PriorityBoardError> {
        self.cancel_in_flight().await;
        let epoch = self.epoch();

        if !self.resync_owed().await {
            return Ok(ReconcileOutcome::CancelledOnly);
        }
        debug!("Running owed resync after failed undo");
        self.read_and_publish(epoch, Some(undo)).await
    }

    async fn read_and_publish(
        &self,
        epoch: u64,
        overlay: Option<&MoveSet>,
    ) -> Result<ReconcileOutcome, PriorityBoardError> {
        let filter = self.filter().await;
        let persistence = Arc::clone(&self.persistence);

        let fetched = self
            .track_read(self.board_key.clone(), async move {
                persistence.fetch_board(&filter).await
            })
            .await;

        let board = match fetched {
            Ok(board) => board,
            Err(PriorityBoardError::ReadCancelled(_)) => {
                debug!("Board read superseded by a newer write");
                return Ok(ReconcileOutcome::Superseded);
            }
            Err(e) => return Err(e),
        };

        let (board, repaired) = board.normalized();
        if repaired {
            warn!("Fetched board was not densely ranked, positions repaired");
        }

        let version = {
            let _gate = self.store.write_gate().await;
            let mut pending = self.pending.lock().await;
            if self.epoch() != epoch {
                debug!("Board read superseded by a newer write");
                return Ok(ReconcileOutcome::Superseded);
            }
            let board = replay(board, pending.unsettled.values().chain(overlay));
            pending.resync_owed = false;
            self.store.publish(board)
        };

        self.invalidate_dependents().await;
        info!("Board reconciled at version {}", version);
        Ok(ReconcileOutcome::Reconciled { version })
    }

    async fn invalidate_dependents(&self) {
        for key in self.dependents().await {
            if self.invalidations.send(key.clone()).is_err() {
                debug!("No listeners for invalidation of {}", key);
            }
        }
    }
}

/// Lays unsettled move sets over a fetched board, oldest first.
fn replay<'a>(fetched: Board, moves: impl Iterator<Item = &'a MoveSet>) -> Board {
    let mut board = fetched;
    let mut replayed = 0;
    for set in moves {
        board = applier::apply(&board, set);
        replayed += 1;
    }
    if replayed == 0 {
        return board;
    }
    debug!("Replayed {} unsettled move sets over the fetched board", replayed);
    board.normalized().0
}
