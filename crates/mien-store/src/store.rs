//! SQLite store for identities, training samples, history and settings.
//!
//! One connection behind a mutex; callers get short-lived guards. Rows
//! are authoritative for media: file deletions are best effort and any
//! leftovers are collected by the reconciliation sweep.

use crate::fsops::remove_quiet;
use crate::layout::Layout;
use mien_core::slug::slugify;
use mien_core::{Embedding, GalleryEntry};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Highest numeric suffix tried when a slug collides.
const MAX_NAME_SUFFIX: u32 = 99;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    nickname   TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS samples (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id   INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    crop_path     TEXT NOT NULL,
    original_path TEXT,
    embedding     TEXT NOT NULL,
    created_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER REFERENCES identities(id) ON DELETE SET NULL,
    name        TEXT NOT NULL,
    nickname    TEXT,
    score       REAL NOT NULL,
    image_path  TEXT NOT NULL,
    thumb_path  TEXT NOT NULL,
    bbox        TEXT,
    sample_id   INTEGER REFERENCES samples(id) ON DELETE SET NULL,
    created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_samples_identity ON samples(identity_id);
CREATE INDEX IF NOT EXISTS idx_history_identity ON history(identity_id);
CREATE INDEX IF NOT EXISTS idx_history_created ON history(created_at);
";

/// Settings rows seeded on first open. Existing values are never
/// overwritten.
const SEEDED_SETTINGS: &[(&str, &str)] = &[
    (crate::settings::RECOGNITION_THRESHOLD, "0.30"),
    (crate::settings::VOTING_TOP_K, "3"),
    (crate::settings::MAX_SAMPLES_PER_IDENTITY, "10"),
    (crate::settings::HISTORY_MAX_RECORDS, "30"),
    (crate::settings::AUTO_TRAIN_ENABLED, "true"),
];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("name {0:?} folds to an empty slug")]
    EmptySlug(String),

    #[error("no free name variant for {0:?}")]
    NameCollision(String),
}

/// An enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: i64,
    /// Slugged unique name, e.g. `vietanh`.
    pub name: String,
    pub nickname: Option<String>,
    pub created_at: String,
}

/// One stored training sample.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub id: i64,
    pub identity_id: i64,
    pub crop_path: String,
    pub original_path: Option<String>,
    pub embedding: Embedding,
    pub created_at: String,
}

/// One recognition observation in the history ledger.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    /// Cleared when the identity is deleted; name and nickname below
    /// keep the record readable afterwards.
    pub identity_id: Option<i64>,
    pub name: String,
    pub nickname: Option<String>,
    pub score: f32,
    pub image_path: String,
    pub thumb_path: String,
    pub bbox: Option<mien_core::BoundingBox>,
    /// Sample auto-enrolled from this observation, if any.
    pub sample_id: Option<i64>,
    pub created_at: String,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// In-memory store, primarily for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        {
            let mut stmt =
                conn.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
            for (key, value) in SEEDED_SETTINGS {
                stmt.execute(params![key, value])?;
            }
        }
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- identities ----

    /// Create an identity from a display name.
    ///
    /// The name is slugged; on collision, numeric suffixes are appended
    /// (`ana`, `ana2`, `ana3`, ...).
    pub fn create_identity(
        &self,
        display_name: &str,
        nickname: Option<&str>,
    ) -> Result<Identity, StoreError> {
        let base = slugify(display_name);
        if base.is_empty() {
            return Err(StoreError::EmptySlug(display_name.to_string()));
        }

        let conn = self.conn();
        let mut name = base.clone();
        let mut suffix = 2u32;
        while name_exists(&conn, &name)? {
            if suffix > MAX_NAME_SUFFIX {
                return Err(StoreError::NameCollision(base));
            }
            name = format!("{base}{suffix}");
            suffix += 1;
        }

        conn.execute(
            "INSERT INTO identities (name, nickname) VALUES (?1, ?2)",
            params![name, nickname],
        )?;
        let id = conn.last_insert_rowid();
        let identity = conn.query_row(
            "SELECT id, name, nickname, created_at FROM identities WHERE id = ?1",
            [id],
            read_identity,
        )?;
        tracing::info!(identity = %identity.name, id, "created identity");
        Ok(identity)
    }

    pub fn identity(&self, id: i64) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, name, nickname, created_at FROM identities WHERE id = ?1",
                [id],
                read_identity,
            )
            .optional()?)
    }

    pub fn identity_by_name(&self, name: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, name, nickname, created_at FROM identities WHERE name = ?1",
                [name],
                read_identity,
            )
            .optional()?)
    }

    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, nickname, created_at FROM identities ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], read_identity)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn set_nickname(&self, id: i64, nickname: Option<&str>) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE identities SET nickname = ?1 WHERE id = ?2",
            params![nickname, id],
        )?;
        Ok(())
    }

    /// Delete an identity with its samples and their media.
    ///
    /// History records survive: the identity reference is cleared while
    /// the denormalized name and nickname stay readable.
    pub fn delete_identity(&self, layout: &Layout, id: i64) -> Result<(), StoreError> {
        let (name, media) = {
            let conn = self.conn();
            let Some(identity) = conn
                .query_row(
                    "SELECT id, name, nickname, created_at FROM identities WHERE id = ?1",
                    [id],
                    read_identity,
                )
                .optional()?
            else {
                return Ok(());
            };
            let media = sample_media(&conn, id)?;
            conn.execute("DELETE FROM identities WHERE id = ?1", [id])?;
            (identity.name, media)
        };

        for (crop, original) in &media {
            remove_quiet(Path::new(crop));
            if let Some(original) = original {
                remove_quiet(Path::new(original));
            }
        }
        layout.remove_identity_dirs(&name);
        tracing::info!(identity = %name, samples = media.len(), "deleted identity");
        Ok(())
    }

    // ---- training samples ----

    pub fn add_sample(
        &self,
        identity_id: i64,
        crop_path: &str,
        original_path: Option<&str>,
        embedding: &Embedding,
    ) -> Result<i64, StoreError> {
        let json = serde_json::to_string(embedding)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO samples (identity_id, crop_path, original_path, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![identity_id, crop_path, original_path, json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Samples of one identity, oldest first.
    pub fn samples_for(&self, identity_id: i64) -> Result<Vec<TrainingSample>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, identity_id, crop_path, original_path, embedding, created_at
             FROM samples WHERE identity_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([identity_id], read_sample_raw)?;
        let mut samples = Vec::new();
        for row in rows {
            let (raw, embedding_json) = row?;
            samples.push(TrainingSample {
                embedding: serde_json::from_str(&embedding_json)?,
                ..raw
            });
        }
        Ok(samples)
    }

    pub fn sample_count(&self, identity_id: i64) -> Result<i64, StoreError> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM samples WHERE identity_id = ?1",
            [identity_id],
            |row| row.get(0),
        )?)
    }

    /// The sample evicted first when the quota is hit: smallest
    /// created_at, ties broken by smallest id.
    pub fn oldest_sample(&self, identity_id: i64) -> Result<Option<TrainingSample>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, identity_id, crop_path, original_path, embedding, created_at
                 FROM samples WHERE identity_id = ?1
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                [identity_id],
                read_sample_raw,
            )
            .optional()?;
        match row {
            Some((raw, embedding_json)) => Ok(Some(TrainingSample {
                embedding: serde_json::from_str(&embedding_json)?,
                ..raw
            })),
            None => Ok(None),
        }
    }

    pub fn update_sample_embedding(
        &self,
        sample_id: i64,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(embedding)?;
        self.conn().execute(
            "UPDATE samples SET embedding = ?1 WHERE id = ?2",
            params![json, sample_id],
        )?;
        Ok(())
    }

    /// Delete one sample row and its media files, pruning the identity
    /// directories if they end up empty.
    pub fn delete_sample(&self, layout: &Layout, sample_id: i64) -> Result<(), StoreError> {
        let row: Option<(String, Option<String>, String)> = {
            let conn = self.conn();
            let row = conn
                .query_row(
                    "SELECT s.crop_path, s.original_path, i.name
                     FROM samples s JOIN identities i ON i.id = s.identity_id
                     WHERE s.id = ?1",
                    [sample_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            if row.is_some() {
                conn.execute("DELETE FROM samples WHERE id = ?1", [sample_id])?;
            }
            row
        };

        let Some((crop, original, identity_name)) = row else {
            return Ok(());
        };
        remove_quiet(Path::new(&crop));
        if let Some(original) = original {
            remove_quiet(Path::new(&original));
        }
        layout.prune_identity_dirs(&identity_name);
        Ok(())
    }

    /// Every stored sample flattened for matching. Samples whose stored
    /// embedding does not parse are skipped with a warning rather than
    /// failing the whole pass.
    pub fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, i.name, i.nickname, s.embedding
             FROM samples s JOIN identities i ON i.id = s.identity_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut gallery = Vec::new();
        for row in rows {
            let (sample_id, name, nickname, embedding_json) = row?;
            match serde_json::from_str(&embedding_json) {
                Ok(embedding) => gallery.push(GalleryEntry { sample_id, name, nickname, embedding }),
                Err(e) => tracing::warn!(
                    sample_id,
                    error = %e,
                    "skipping sample with unreadable embedding"
                ),
            }
        }
        Ok(gallery)
    }

    // ---- settings ----

    pub fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn name_exists(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM identities WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn read_identity(row: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        nickname: row.get(2)?,
        created_at: row.get(3)?,
    })
}

// Embedding JSON is returned raw so callers choose strict or lenient
// parsing.
fn read_sample_raw(row: &Row<'_>) -> rusqlite::Result<(TrainingSample, String)> {
    Ok((
        TrainingSample {
            id: row.get(0)?,
            identity_id: row.get(1)?,
            crop_path: row.get(2)?,
            original_path: row.get(3)?,
            embedding: Embedding::new(Vec::new()),
            created_at: row.get(5)?,
        },
        row.get(4)?,
    ))
}

fn sample_media(
    conn: &Connection,
    identity_id: i64,
) -> Result<Vec<(String, Option<String>)>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT crop_path, original_path FROM samples WHERE identity_id = ?1")?;
    let rows = stmt.query_map([identity_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}
