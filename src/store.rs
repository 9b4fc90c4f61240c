// Copyright 2026 SkyVision Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Once;
use std::thread::sleep;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use fs2::FileExt;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::functions::FunctionFlags;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use rusqlite::types::ValueRef;
use sha2::Digest;
use sha2::Sha256;
use tracing::debug;

use crate::embed::to_bytes;
use crate::error::SearchError;
use crate::error::SearchResult;
use crate::model::AirlineRecord;
use crate::model::AirportRecord;
use crate::model::CandidateRow;
use crate::model::RawMetadata;
use crate::plan::QueryPlan;
use crate::sql::render_plan;

const SCHEMA_VERSION: i64 = 1;

/// Executes query plans. The only seam between planning and a database.
pub trait Storage {
    fn execute(&self, plan: &QueryPlan) -> SearchResult<Vec<CandidateRow>>;
}

pub struct Store {
    pub conn: Connection,
    pub path: PathBuf,
    lock: Option<StoreLock>,
}

struct StoreLock {
    _file: File,
    path: PathBuf,
    mode: StoreMode,
}

impl StoreLock {
    fn new(file: File, path: PathBuf, mode: StoreMode) -> Self {
        Self {
            _file: file,
            path,
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StoreMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub airport_count: i64,
    pub airline_count: i64,
    pub embedding_dim: i64,
    pub db_size_bytes: u64,
}

#[derive(Debug)]
pub struct IntegrityReport {
    pub status: String,
    pub ping: bool,
    pub vec_version: Option<String>,
    pub stats: StoreStats,
}

/// Registers sqlite-vec for every connection opened by this process.
fn register_vec_extension() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Replaces SQLite's ASCII-only `lower` so case-insensitive filters fold non-ASCII text too.
fn register_unicode_lower(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Text(v.to_string()),
                ValueRef::Real(v) => Value::Text(v.to_string()),
                ValueRef::Text(bytes) => {
                    Value::Text(String::from_utf8_lossy(bytes).to_lowercase())
                }
                ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
            })
        },
    )
    .context("register lower()")
}

impl Store {
    pub fn init(path: &Path, embedding_dim: usize) -> Result<()> {
        if path.exists() {
            anyhow::bail!("store already exists at {}", path.display());
        }
        let _lock = Self::acquire_lock(path, StoreMode::ReadWrite)?;
        let conn = Self::open_connection(path, StoreMode::ReadWrite)?;
        Self::apply_pragmas(&conn, StoreMode::ReadWrite)?;
        Self::create_schema(&conn)?;
        Self::set_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        Self::set_meta(&conn, "embedding_dim", &embedding_dim.to_string())?;
        Ok(())
    }

    /// Opens an existing store. The stored embedding dimension must match
    /// the configured one.
    pub fn open(path: &Path, mode: StoreMode, embedding_dim: usize) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "store not found at {}; run `skyvision init` first",
                path.display()
            );
        }
        let lock = Self::acquire_lock(path, mode)?;
        let conn = Self::open_connection(path, mode)?;
        Self::apply_pragmas(&conn, mode)?;

        let version = Self::schema_version(&conn)?;
        if version != SCHEMA_VERSION {
            anyhow::bail!(
                "store schema version {} is not supported (expected {})",
                version,
                SCHEMA_VERSION
            );
        }
        let stored_dim = Self::get_meta(&conn, "embedding_dim")?
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if stored_dim != embedding_dim {
            anyhow::bail!(
                "store embedding_dim {} does not match configured embedding_dim {}",
                stored_dim,
                embedding_dim
            );
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            lock: Some(lock),
        })
    }

    fn open_connection(path: &Path, mode: StoreMode) -> Result<Connection> {
        register_vec_extension();
        let flags = match mode {
            StoreMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            StoreMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("open {}", path.display()))?;
        conn.busy_timeout(Duration::from_millis(5000))
            .context("set busy timeout")?;
        register_unicode_lower(&conn)?;
        Ok(conn)
    }

    fn apply_pragmas(conn: &Connection, mode: StoreMode) -> Result<()> {
        if matches!(mode, StoreMode::ReadWrite) {
            conn.execute_batch("PRAGMA journal_mode=DELETE;\nPRAGMA synchronous=NORMAL;")
                .context("apply pragmas")?;
        }
        Ok(())
    }

    fn lock_path_for(path: &Path) -> Result<PathBuf> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize());
        let mut dir = std::env::temp_dir();
        dir.push("skyvision");
        fs::create_dir_all(&dir).with_context(|| format!("create lock dir {}", dir.display()))?;
        Ok(dir.join(format!("skyvision-{hash}.lock")))
    }

    fn acquire_lock(path: &Path, mode: StoreMode) -> Result<StoreLock> {
        let lock_path = Self::lock_path_for(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))?;
        let deadline = Instant::now() + Duration::from_millis(5000);
        loop {
            let locked = match mode {
                StoreMode::ReadOnly => FileExt::try_lock_shared(&file),
                StoreMode::ReadWrite => FileExt::try_lock_exclusive(&file),
            };
            match locked {
                Ok(()) => return Ok(StoreLock::new(file, lock_path, mode)),
                Err(_) if Instant::now() >= deadline => {
                    let mode_label = match mode {
                        StoreMode::ReadOnly => "read",
                        StoreMode::ReadWrite => "write",
                    };
                    anyhow::bail!(
                        "store is locked for {mode_label} access; another process may be using {}",
                        path.display()
                    );
                }
                Err(_) => {
                    sleep(Duration::from_millis(50));
                }
            }
        }
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT
);

CREATE TABLE IF NOT EXISTS airport (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  city TEXT,
  country TEXT,
  iata TEXT,
  icao TEXT,
  latitude REAL,
  longitude REAL,
  image_url TEXT,
  metadata TEXT,
  embedding BLOB
);

CREATE TABLE IF NOT EXISTS airline (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  alias TEXT,
  iata TEXT,
  icao TEXT,
  callsign TEXT,
  country TEXT,
  active TEXT,
  logo_url TEXT,
  metadata TEXT,
  embedding BLOB
);

CREATE INDEX IF NOT EXISTS idx_airport_country ON airport(country);
CREATE INDEX IF NOT EXISTS idx_airline_country ON airline(country);",
        )
        .context("create schema")?;
        Ok(())
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .context("set meta")?;
        Ok(())
    }

    fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
        conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .with_context(|| format!("read meta {key}"))
    }

    fn schema_version(conn: &Connection) -> Result<i64> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='meta'",
                [],
                |row| row.get(0),
            )
            .context("check meta table")?;
        if count == 0 {
            return Ok(0);
        }
        Ok(Self::get_meta(conn, "schema_version")?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0))
    }

    pub fn record_load(&self, loaded_at: &str) -> Result<()> {
        Self::set_meta(&self.conn, "loaded_at", loaded_at)
    }

    pub fn upsert_airport(&self, record: &AirportRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO airport
  (id, name, city, country, iata, icao, latitude, longitude, image_url, metadata, embedding)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.name,
                    record.city,
                    record.country,
                    record.iata,
                    record.icao,
                    record.latitude,
                    record.longitude,
                    record.image_url,
                    record.metadata,
                    to_bytes(&record.embedding),
                ],
            )
            .with_context(|| format!("upsert airport {}", record.id))?;
        Ok(())
    }

    pub fn upsert_airline(&self, record: &AirlineRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO airline
  (id, name, alias, iata, icao, callsign, country, active, logo_url, metadata, embedding)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.name,
                    record.alias,
                    record.iata,
                    record.icao,
                    record.callsign,
                    record.country,
                    record.active,
                    record.logo_url,
                    record.metadata,
                    to_bytes(&record.embedding),
                ],
            )
            .with_context(|| format!("upsert airline {}", record.id))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let airport_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM airport", [], |row| row.get(0))
            .context("count airports")?;
        let airline_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM airline", [], |row| row.get(0))
            .context("count airlines")?;
        let embedding_dim = Self::get_meta(&self.conn, "embedding_dim")?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(StoreStats {
            airport_count,
            airline_count,
            embedding_dim,
            db_size_bytes,
        })
    }

    pub fn ping(&self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let status: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .context("integrity_check")?;
        let vec_version: Option<String> = self
            .conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .ok();
        Ok(IntegrityReport {
            status,
            ping: self.ping(),
            vec_version,
            stats: self.stats()?,
        })
    }
}

fn map_candidate(row: &Row) -> rusqlite::Result<CandidateRow> {
    let metadata = match row.get_ref(7)? {
        ValueRef::Null => None,
        ValueRef::Text(text) => Some(RawMetadata::Text(String::from_utf8_lossy(text).into_owned())),
        ValueRef::Blob(bytes) => Some(RawMetadata::Bytes(bytes.to_vec())),
        ValueRef::Integer(n) => Some(RawMetadata::Json(serde_json::json!(n))),
        ValueRef::Real(f) => Some(RawMetadata::Json(serde_json::json!(f))),
    };
    let distance: Option<f64> = row.get(8)?;
    Ok(CandidateRow {
        id: row.get(0)?,
        name: row.get(1)?,
        city: row.get(2)?,
        country: row.get(3)?,
        iata: row.get(4)?,
        icao: row.get(5)?,
        media_url: row.get(6)?,
        metadata,
        // SQLite returns NULL for an undefined distance (zero vectors).
        distance: distance.unwrap_or(f64::INFINITY),
    })
}

impl Storage for Store {
    fn execute(&self, plan: &QueryPlan) -> SearchResult<Vec<CandidateRow>> {
        let (sql, params) = render_plan(plan);
        debug!(sql = %sql, params = params.len(), "execute plan");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| SearchError::Storage(anyhow::Error::new(err).context("prepare plan")))?;
        let rows = stmt.query_map(params_from_iter(params), map_candidate)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let path = lock.path.clone();
            let mode = lock.mode;
            drop(lock);
            if matches!(mode, StoreMode::ReadWrite) {
                let _ = fs::remove_file(path);
            }
        }
    }
}
