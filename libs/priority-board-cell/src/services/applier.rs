use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::{Board, ColumnId, ItemKey, Move, MoveSet};

/// Writes every move into a fresh copy of `board`. Items not named by the
/// set keep their column and position; the input board is never touched.
pub fn apply(board: &Board, moves: &MoveSet) -> Board {
    let mut next = board.clone();
    if moves.is_empty() {
        return next;
    }

    let known: HashSet<&ColumnId> = board.columns.iter().map(|c| &c.id).collect();
    let mut accepted: HashMap<ItemKey, &Move> = HashMap::with_capacity(moves.len());
    for m in moves {
        if known.contains(&m.column_id) {
            accepted.insert(m.key(), m);
        } else {
            warn!("Skipping move of {} into unknown column {}", m.key(), m.column_id);
        }
    }

    for column in &mut next.columns {
        column.items.retain(|item| !accepted.contains_key(&item.key()));
    }

    let mut touched: HashSet<ColumnId> = HashSet::new();
    for m in moves {
        // Last assignment for a key wins.
        let Some(chosen) = accepted.remove(&m.key()) else {
            continue;
        };
        if let Some(column) = next.columns.iter_mut().find(|c| c.id == chosen.column_id) {
            column.items.push(chosen.clone().into_item());
            touched.insert(column.id.clone());
        }
    }

    for column in next.columns.iter_mut().filter(|c| touched.contains(&c.id)) {
        column.items.sort_by_key(|item| item.position);
    }

    next
}
