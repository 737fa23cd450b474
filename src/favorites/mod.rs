use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::catalog::RemoteEntity;
use crate::db::{self, Favorite, StoreError};


/// Spacing between freshly assigned sort orders. Leaves room for
/// midpoint inserts so a reorder almost never rewrites other rows.
const GAP_SIZE: i64 = 1_000;

/// One row of the quick-add list: the remote entity as the server last
/// reported it, joined with the local overlay record that put it there.
#[derive(Clone, Debug)]
pub struct ReconciledFavorite {
    pub entity: RemoteEntity,
    pub favorite: Favorite,
}

/// Marks an entity as a quick-add favorite, appending it after the
/// connection's current favorites. Re-adding an existing favorite is a
/// no-op that keeps its position.
pub fn add_favorite(
    conn: &Connection,
    server_connection: &str,
    entity_id: &str,
) -> Result<Favorite> {
    if let Some(existing) = db::get_favorite(conn, server_connection, entity_id)? {
        return Ok(existing);
    }

    let sort_order = db::max_sort_order_by_connection(conn, server_connection)?
        .map(|max| max.saturating_add(GAP_SIZE))
        .unwrap_or(GAP_SIZE);

    Ok(db::upsert_favorite(
        conn,
        server_connection,
        entity_id,
        sort_order,
    )?)
}

pub fn remove_favorite(
    conn: &Connection,
    server_connection: &str,
    entity_id: &str,
) -> Result<()> {
    db::remove_favorite(conn, &db::compound_id(server_connection, entity_id))?;
    Ok(())
}

/// A sort order strictly between the two neighbors at the target slot,
/// or `None` when the gap is exhausted and a renumbering pass is needed.
fn order_between(left: Option<i64>, right: Option<i64>) -> Option<i64> {
    match (left, right) {
        (None, None) => Some(GAP_SIZE),
        (Some(l), None) => Some(l.saturating_add(GAP_SIZE)),
        (None, Some(r)) => {
            let target = if r > GAP_SIZE { r - GAP_SIZE } else { r / 2 };
            (target > 0 && target < r).then_some(target)
        }
        (Some(l), Some(r)) => {
            let mid = l + (r - l) / 2;
            (mid > l && mid < r).then_some(mid)
        }
    }
}

/// Rewrites the connection's sort orders to multiples of `GAP_SIZE`,
/// preserving the current relative order. Must run inside the caller's
/// transaction.
fn renumber_connection(conn: &Connection, server_connection: &str) -> Result<(), StoreError> {
    let rows = db::list_favorites_by_connection(conn, server_connection)?;
    for (index, row) in rows.iter().enumerate() {
        let sort_order = GAP_SIZE * (index as i64 + 1);
        db::set_favorite_sort_order(conn, &row.compound_id, sort_order)?;
    }
    Ok(())
}

fn neighbor_orders(others: &[Favorite], position: usize) -> (Option<i64>, Option<i64>) {
    let position = position.min(others.len());
    let left = position.checked_sub(1).map(|i| others[i].sort_order);
    let right = others.get(position).map(|f| f.sort_order);
    (left, right)
}

/// Moves a favorite to `position` (0-based, counted over the list with
/// the moved row taken out). Midpoint insert in the common case; when
/// adjacent orders leave no integer between them, the connection is
/// renumbered first and the move re-applied. The whole move commits as
/// one unit, so a reader never observes a half-applied reorder.
pub fn move_favorite_to_position(
    conn: &Connection,
    server_connection: &str,
    entity_id: &str,
    position: usize,
) -> Result<Favorite> {
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(StoreError::from)?;

    let result: Result<Favorite> = (|| {
        let moved_id = db::compound_id(server_connection, entity_id);
        let rows = db::list_favorites_by_connection(conn, server_connection)?;
        if !rows.iter().any(|r| r.compound_id == moved_id) {
            return Err(anyhow!(
                "not a quick-add favorite: {entity_id} ({server_connection})"
            ));
        }

        let others: Vec<Favorite> = rows
            .into_iter()
            .filter(|r| r.compound_id != moved_id)
            .collect();

        let (left, right) = neighbor_orders(&others, position);
        let sort_order = match order_between(left, right) {
            Some(order) => order,
            None => {
                renumber_connection(conn, server_connection)?;
                let others: Vec<Favorite> =
                    db::list_favorites_by_connection(conn, server_connection)?
                        .into_iter()
                        .filter(|r| r.compound_id != moved_id)
                        .collect();
                let (left, right) = neighbor_orders(&others, position);
                order_between(left, right).ok_or_else(|| {
                    anyhow!("no usable sort order after renumbering ({server_connection})")
                })?
            }
        };

        Ok(db::upsert_favorite(
            conn,
            server_connection,
            entity_id,
            sort_order,
        )?)
    })();

    match result {
        Ok(favorite) => {
            conn.execute_batch("COMMIT;").map_err(StoreError::from)?;
            Ok(favorite)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(e)
        }
    }
}

/// Merges the remote entity snapshot for one server connection with the
/// local overlay and produces the quick-add list in user order.
///
/// Overlay rows whose entity no longer exists remotely are orphans: the
/// entity was deleted server-side since it was favorited. They are
/// removed here, silently, in one all-or-nothing pass. Entities with no
/// overlay row are not part of the output; the full catalog listing is
/// a separate concern that never consults the overlay.
pub fn reconcile(
    conn: &Connection,
    server_connection: &str,
    remote_entities: &[RemoteEntity],
) -> Result<Vec<ReconciledFavorite>> {
    let rows = db::list_favorites_by_connection(conn, server_connection)?;

    let by_id: BTreeMap<&str, &RemoteEntity> = remote_entities
        .iter()
        .map(|entity| (entity.id.as_str(), entity))
        .collect();

    let (matched, orphaned): (Vec<Favorite>, Vec<Favorite>) = rows
        .into_iter()
        .partition(|row| by_id.contains_key(row.entity_id.as_str()));

    if !orphaned.is_empty() {
        conn.execute_batch("BEGIN IMMEDIATE;")
            .map_err(StoreError::from)?;

        let result: Result<(), StoreError> = (|| {
            for row in &orphaned {
                db::remove_favorite(conn, &row.compound_id)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT;").map_err(StoreError::from)?;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                return Err(e.into());
            }
        }
    }

    Ok(matched
        .into_iter()
        .map(|favorite| ReconciledFavorite {
            entity: by_id[favorite.entity_id.as_str()].clone(),
            favorite,
        })
        .collect())
}
