use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::services::invalidation::{InvalidationCoordinator, MutationId};
use crate::services::notifications::{partial_failure_message, NotificationService};
use crate::services::persistence::BoardPersistence;
use crate::{
    DispatchKind, DispatchOutcome, DispatchReport, MoveSet, PriorityBoardError, ReconcileOutcome,
    ReconcileReason, SubmitMovesRequest,
};

/// Sends a move set as one batched write and turns the result into user
/// notifications. Persistence errors stop here.
pub struct MutationDispatcher {
    persistence: Arc<dyn BoardPersistence>,
    coordinator: Arc<InvalidationCoordinator>,
    notifications: Arc<NotificationService>,
}

impl MutationDispatcher {
    pub fn new(
        persistence: Arc<dyn BoardPersistence>,
        coordinator: Arc<InvalidationCoordinator>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            persistence,
            coordinator,
            notifications,
        }
    }

    /// Persists `moves`, then always runs the cancel-then-resync sequence.
    ///
    /// A total failure of a move forces a re-hydration. A failed undo only
    /// cancels stale reads so the restored board stays on screen, unless a
    /// deferred resync is owed.
    pub async fn dispatch(&self, moves: &MoveSet, kind: DispatchKind) -> DispatchReport {
        let id = self.coordinator.begin_mutation(moves).await;
        self.dispatch_registered(id, moves, kind).await
    }

    /// Same as [`dispatch`](Self::dispatch) for a mutation the caller already
    /// counted with `begin_mutation`, typically before its optimistic publish.
    #[instrument(skip(self, moves), fields(moves = moves.len()))]
    pub async fn dispatch_registered(
        &self,
        id: MutationId,
        moves: &MoveSet,
        kind: DispatchKind,
    ) -> DispatchReport {
        let batch_id = Uuid::new_v4();
        let request = SubmitMovesRequest::from(moves);

        let submitted = self.persistence.submit_moves(&request).await;
        self.coordinator.end_mutation(id).await;

        let (outcome, results) = match submitted {
            Ok(response) => {
                let failed = response.failed_count();
                if failed > 0 {
                    self.notifications
                        .warning(partial_failure_message(failed))
                        .await;
                    (DispatchOutcome::PartiallyApplied { failed }, response.results)
                } else {
                    debug!("Batch {} applied ({} moves)", batch_id, moves.len());
                    if kind == DispatchKind::Undo {
                        self.notifications.info("Undo saved").await;
                    }
                    (DispatchOutcome::Applied, response.results)
                }
            }
            Err(e) => {
                let message = match kind {
                    DispatchKind::Move => format!("Failed to update priorities: {}", e),
                    DispatchKind::Undo => format!("Undo could not be saved: {}", e),
                };
                self.notifications.error(message).await;
                (DispatchOutcome::Failed { error: e.to_string() }, Vec::new())
            }
        };

        let reconcile = match (&outcome, kind) {
            (DispatchOutcome::Failed { .. }, DispatchKind::Undo) => {
                let settled = self.coordinator.settle_failed_undo(moves).await;
                self.report_read(settled).await
            }
            (DispatchOutcome::Failed { .. }, DispatchKind::Move) => {
                self.resync(ReconcileReason::Rollback).await
            }
            _ => self.resync(ReconcileReason::MutationSettled).await,
        };

        DispatchReport {
            batch_id,
            kind,
            submitted: moves.len(),
            outcome,
            results,
            reconcile,
        }
    }

    async fn resync(&self, reason: ReconcileReason) -> ReconcileOutcome {
        let reconciled = self.coordinator.reconcile(reason).await;
        self.report_read(reconciled).await
    }

    async fn report_read(
        &self,
        reconciled: Result<ReconcileOutcome, PriorityBoardError>,
    ) -> ReconcileOutcome {
        match reconciled {
            Ok(outcome) => outcome,
            Err(e) => {
                self.notifications
                    .error(format!("Could not refresh the board: {}", e))
                    .await;
                ReconcileOutcome::ReadFailed
            }
        }
    }
}
