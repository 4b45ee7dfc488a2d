use tracing::debug;

use crate::{Board, ColumnId, DragTarget, Item, ItemKey, Move, MoveSet};

/// Computes the dense re-ranking produced by dropping `active` onto `over`.
///
/// Every item of each touched column (source, and destination when it
/// differs) receives a move, not only the dragged one. Dropping onto itself,
/// onto anything that does not resolve to a column, or onto a spot that
/// leaves the order unchanged yields an empty set.
pub fn plan(board: &Board, active: &ItemKey, over: &DragTarget) -> MoveSet {
    let Some((source_col, source_idx)) = board.locate(active) else {
        debug!("Dragged item {} is not on the board", active);
        return MoveSet::empty();
    };

    let (dest_col, over_idx) = match over {
        DragTarget::Item(key) if key == active => return MoveSet::empty(),
        DragTarget::Item(key) => match board.locate(key) {
            Some((col, idx)) => (col, Some(idx)),
            None => {
                debug!("Drop target {} does not resolve to a column", key);
                return MoveSet::empty();
            }
        },
        DragTarget::Placeholder { column_id } => match board.column_index(column_id) {
            Some(col) => (col, None),
            None => {
                debug!("Drop placeholder for unknown column {}", column_id);
                return MoveSet::empty();
            }
        },
    };

    if source_col == dest_col {
        let column = &board.columns[source_col];
        let mut items = column.items.clone();
        let dragged = items.remove(source_idx);
        // After removal, index `over_idx` lands after the target when moving
        // down and before it when moving up.
        let insert_at = over_idx.unwrap_or(items.len()).min(items.len());
        items.insert(insert_at, dragged);

        if same_order(&column.items, &items) {
            return MoveSet::empty();
        }
        return MoveSet::new(rank(&column.id, &items));
    }

    let source = &board.columns[source_col];
    let dest = &board.columns[dest_col];

    let mut source_items = source.items.clone();
    let dragged = source_items.remove(source_idx);
    let mut dest_items = dest.items.clone();
    let insert_at = over_idx.unwrap_or(dest_items.len()).min(dest_items.len());
    dest_items.insert(insert_at, dragged);

    let mut moves = rank(&source.id, &source_items);
    moves.extend(rank(&dest.id, &dest_items));
    MoveSet::new(moves)
}

fn rank(column_id: &ColumnId, items: &[Item]) -> Vec<Move> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| Move {
            entity_id: item.entity_id.clone(),
            slot_id: item.slot_id.clone(),
            column_id: column_id.clone(),
            position: idx as u32,
        })
        .collect()
}

fn same_order(before: &[Item], after: &[Item]) -> bool {
    before.len() == after.len()
        && before
            .iter()
            .zip(after)
            .all(|(a, b)| a.entity_id == b.entity_id && a.slot_id == b.slot_id)
}
