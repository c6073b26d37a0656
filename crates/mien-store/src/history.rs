//! Capped recognition history ledger.
//!
//! Every processed face appends one record pointing at a stored frame
//! and thumbnail. The ledger never exceeds its configured ceiling:
//! appending past it evicts the oldest rows in the same transaction,
//! with their media deleted best effort after commit.

use crate::fsops::{file_size, remove_quiet};
use crate::layout::Layout;
use crate::store::{HistoryRecord, Identity, Store, StoreError};
use mien_core::BoundingBox;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Fields of a history record to append. Paths must already point at
/// the written media files.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub identity_id: Option<i64>,
    pub name: String,
    pub nickname: Option<String>,
    pub score: f32,
    pub image_path: String,
    pub thumb_path: String,
    pub bbox: Option<BoundingBox>,
    pub sample_id: Option<i64>,
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub freed_bytes: u64,
}

// Eviction order for the ledger: oldest first, id breaking same-second
// ties.
const OVERFLOW_SQL: &str = "SELECT id, image_path, thumb_path FROM history
     ORDER BY created_at ASC, id ASC LIMIT ?1";

/// Append one record, evicting overflow beyond `max_records`.
///
/// Insert and eviction commit atomically; media of evicted rows is
/// removed after the transaction.
pub fn append(store: &Store, record: &NewRecord, max_records: usize) -> Result<i64, StoreError> {
    let bbox_json = record
        .bbox
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let (id, evicted) = {
        let mut conn = store.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO history
                 (identity_id, name, nickname, score, image_path, thumb_path, bbox, sample_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.identity_id,
                record.name,
                record.nickname,
                record.score,
                record.image_path,
                record.thumb_path,
                bbox_json,
                record.sample_id,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let evicted = overflow_rows(&tx, max_records)?;
        delete_rows(&tx, &evicted)?;
        tx.commit()?;
        (id, evicted)
    };

    for (_, image, thumb) in &evicted {
        remove_quiet(Path::new(image));
        remove_quiet(Path::new(thumb));
    }
    if !evicted.is_empty() {
        tracing::info!(evicted = evicted.len(), cap = max_records, "history ledger trimmed");
    }
    Ok(id)
}

/// Trim the ledger down to `max_records`, deleting evicted media.
pub fn evict_overflow(store: &Store, max_records: usize) -> Result<CleanupReport, StoreError> {
    let evicted = {
        let mut conn = store.conn();
        let tx = conn.transaction()?;
        let evicted = overflow_rows(&tx, max_records)?;
        delete_rows(&tx, &evicted)?;
        tx.commit()?;
        evicted
    };

    let mut report = CleanupReport::default();
    for (_, image, thumb) in &evicted {
        report.freed_bytes += file_size(Path::new(image)) + file_size(Path::new(thumb));
        remove_quiet(Path::new(image));
        remove_quiet(Path::new(thumb));
        report.deleted += 1;
    }
    Ok(report)
}

/// Most recent records first.
pub fn list(store: &Store, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT id, identity_id, name, nickname, score, image_path, thumb_path,
                bbox, sample_id, created_at
         FROM history ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok(HistoryRecord {
            id: row.get(0)?,
            identity_id: row.get(1)?,
            name: row.get(2)?,
            nickname: row.get(3)?,
            score: row.get(4)?,
            image_path: row.get(5)?,
            thumb_path: row.get(6)?,
            bbox: parse_bbox(row.get(7)?),
            sample_id: row.get(8)?,
            created_at: row.get(9)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn count(store: &Store) -> Result<i64, StoreError> {
    Ok(store
        .conn()
        .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?)
}

/// Undo one observation: delete the record, its media, and the sample
/// it auto-enrolled (with both sample media files).
pub fn undo(store: &Store, layout: &Layout, history_id: i64) -> Result<(), StoreError> {
    let row: Option<(Option<i64>, String, String)> = store
        .conn()
        .query_row(
            "SELECT sample_id, image_path, thumb_path FROM history WHERE id = ?1",
            [history_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((sample_id, image, thumb)) = row else {
        return Ok(());
    };

    if let Some(sample_id) = sample_id {
        store.delete_sample(layout, sample_id)?;
    }
    remove_quiet(Path::new(&image));
    remove_quiet(Path::new(&thumb));
    store
        .conn()
        .execute("DELETE FROM history WHERE id = ?1", [history_id])?;
    tracing::info!(history_id, unenrolled = sample_id.is_some(), "history record undone");
    Ok(())
}

/// Delete every record and its media. Returns how many records went.
pub fn clear(store: &Store) -> Result<usize, StoreError> {
    let media: Vec<(String, String)> = {
        let conn = store.conn();
        let mut stmt = conn.prepare("SELECT image_path, thumb_path FROM history")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    store.conn().execute("DELETE FROM history", [])?;

    for (image, thumb) in &media {
        remove_quiet(Path::new(image));
        remove_quiet(Path::new(thumb));
    }
    Ok(media.len())
}

/// Point an existing record at an identity, refreshing the denormalized
/// fields. Used when an unknown observation is adopted into the
/// gallery.
pub fn relabel(
    store: &Store,
    history_id: i64,
    identity: &Identity,
    score: f32,
    sample_id: Option<i64>,
) -> Result<(), StoreError> {
    store.conn().execute(
        "UPDATE history SET identity_id = ?1, name = ?2, nickname = ?3, score = ?4, sample_id = ?5
         WHERE id = ?6",
        params![identity.id, identity.name, identity.nickname, score, sample_id, history_id],
    )?;
    Ok(())
}

/// Every media path the ledger still references.
pub(crate) fn referenced_media(store: &Store) -> Result<HashSet<PathBuf>, StoreError> {
    let conn = store.conn();
    let mut stmt = conn.prepare("SELECT image_path, thumb_path FROM history")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut paths = HashSet::new();
    for row in rows {
        let (image, thumb) = row?;
        paths.insert(PathBuf::from(image));
        paths.insert(PathBuf::from(thumb));
    }
    Ok(paths)
}

fn overflow_rows(
    conn: &Connection,
    max_records: usize,
) -> rusqlite::Result<Vec<(i64, String, String)>> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
    let excess = total - max_records as i64;
    if excess <= 0 {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(OVERFLOW_SQL)?;
    let rows = stmt.query_map([excess], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?;
    rows.collect()
}

fn delete_rows(conn: &Connection, rows: &[(i64, String, String)]) -> rusqlite::Result<()> {
    for (id, _, _) in rows {
        conn.execute("DELETE FROM history WHERE id = ?1", [id])?;
    }
    Ok(())
}

fn parse_bbox(json: Option<String>) -> Option<BoundingBox> {
    let json = json?;
    match serde_json::from_str(&json) {
        Ok(bbox) => Some(bbox),
        Err(e) => {
            tracing::warn!(error = %e, "unreadable bbox in history record");
            None
        }
    }
}
