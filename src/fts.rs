//! Persistent full-text index over note content, kept in its own SQLite
//! file under the user cache directory. The source store is never written.
//!
//! Staleness is judged against the store's latest modification timestamp
//! plus a small slack. An empty index builds synchronously; a stale one is
//! served as-is while a single background rebuild runs on its own store
//! accessor, and the finished handle is swapped in on a later search.

use crate::blob;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::store::NotesStore;
use crossbeam_channel::{Receiver, Sender, unbounded};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Modifications within this many seconds of the last build do not count as
/// staleness.
const STALENESS_SLACK_SECS: f64 = 5.0;

const PROGRESS_EVERY: usize = 50;

pub struct FtsHit {
    pub note_id: String,
    pub snippet: String,
}

pub struct FtsSearch {
    pub hits: Vec<FtsHit>,
    /// True when results were served from an index known to lag the store.
    pub stale: bool,
}

pub struct FtsIndex {
    path: PathBuf,
    conn: Mutex<Connection>,
    rebuilding: Arc<AtomicBool>,
    rebuilds_started: Arc<AtomicU64>,
    done_tx: Sender<Connection>,
    done_rx: Receiver<Connection>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FtsIndex {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = open_index(&path)?;
        let (done_tx, done_rx) = unbounded();
        Ok(FtsIndex {
            path,
            conn: Mutex::new(conn),
            rebuilding: Arc::new(AtomicBool::new(false)),
            rebuilds_started: Arc::new(AtomicU64::new(0)),
            done_tx,
            done_rx,
            worker: Mutex::new(None),
        })
    }

    /// The index file under the user cache directory.
    pub fn open_default() -> Result<Self> {
        let cache = dirs::cache_dir()
            .ok_or_else(|| Error::StoreUnavailable("no cache directory".into()))?;
        Self::open(cache.join("notes-bridge").join("fts.sqlite"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild the whole index from the store: clear + insert inside one
    /// transaction, so a failed or cancelled build leaves the previous
    /// contents untouched.
    pub fn build(
        &self,
        store: &NotesStore,
        progress: Option<&dyn Fn(usize, usize)>,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let mut conn = self.lock_conn();
        build_into(&mut conn, store, progress, cancel)
    }

    /// Ranked phrase-OR search. Builds synchronously when the index is
    /// empty; flags and serves stale results while a background rebuild is
    /// in flight.
    pub fn search(
        &self,
        store: &NotesStore,
        query: &str,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<FtsSearch> {
        cancel.check()?;
        self.absorb_finished_rebuild();

        let mut stale = false;
        {
            let mut conn = self.lock_conn();
            let rows: i64 =
                conn.query_row("SELECT COUNT(*) FROM note_fts", [], |row| row.get(0))?;
            if rows == 0 {
                debug!("fts index empty, building synchronously");
                build_into(&mut conn, store, None, cancel)?;
            } else if is_stale(&conn, store)? {
                stale = true;
            }
        }
        if stale {
            self.start_background_rebuild(store)?;
        }

        let match_expr = phrase_query(query);
        if match_expr.is_empty() {
            return Ok(FtsSearch {
                hits: Vec::new(),
                stale,
            });
        }

        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT note_id, snippet(note_fts, 4, '**', '**', '…', 20) \
             FROM note_fts WHERE note_fts MATCH ? ORDER BY rank LIMIT ?",
        )?;
        let iter = stmt.query_map(params![match_expr, limit as i64], |row| {
            Ok(FtsHit {
                note_id: row.get(0)?,
                snippet: row.get(1)?,
            })
        })?;
        let mut hits = Vec::new();
        for hit in iter {
            hits.push(hit?);
        }
        Ok(FtsSearch { hits, stale })
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::SeqCst)
    }

    /// How many background rebuilds have ever been started on this handle.
    pub fn rebuilds_started(&self) -> u64 {
        self.rebuilds_started.load(Ordering::SeqCst)
    }

    /// Block until an in-flight background rebuild (if any) finishes and its
    /// handle has been swapped in.
    pub fn wait_for_rebuild(&self) {
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.absorb_finished_rebuild();
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Swap in a connection handed back by a finished rebuild worker.
    fn absorb_finished_rebuild(&self) {
        while let Ok(fresh) = self.done_rx.try_recv() {
            *self.lock_conn() = fresh;
        }
    }

    /// At most one rebuild task in flight; later calls while one is running
    /// are no-ops. The worker opens its own store accessor and its own
    /// index connection, so nothing aliases the foreground handles.
    fn start_background_rebuild(&self, store: &NotesStore) -> Result<()> {
        if self.rebuilding.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.rebuilds_started.fetch_add(1, Ordering::SeqCst);

        let store_path = store.path().to_path_buf();
        let index_path = self.path.clone();
        let done_tx = self.done_tx.clone();
        let rebuilding = Arc::clone(&self.rebuilding);

        let handle = std::thread::spawn(move || {
            let outcome = (|| -> Result<Connection> {
                let store = NotesStore::open(store_path)?;
                let mut conn = open_index(&index_path)?;
                let count = build_into(&mut conn, &store, None, &CancelToken::new())?;
                debug!(count, "background fts rebuild finished");
                Ok(conn)
            })();
            match outcome {
                Ok(conn) => {
                    let _ = done_tx.send(conn);
                }
                Err(e) => warn!(error = %e, "background fts rebuild failed"),
            }
            rebuilding.store(false, Ordering::SeqCst);
        });
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }
}

fn open_index(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", path.display())))?;
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS note_fts USING fts5(
            note_id UNINDEXED,
            title,
            snippet,
            folder,
            content,
            tokenize = 'porter unicode61'
        );
        CREATE TABLE IF NOT EXISTS fts_meta (
            key TEXT PRIMARY KEY,
            value REAL NOT NULL
        );",
    )?;
    Ok(conn)
}

fn build_into(
    conn: &mut Connection,
    store: &NotesStore,
    progress: Option<&dyn Fn(usize, usize)>,
    cancel: &CancelToken,
) -> Result<usize> {
    let rows = store.list_note_rows(&Default::default())?;
    let total = rows.len();

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM note_fts", [])?;
    for (i, (pk, note)) in rows.into_iter().enumerate() {
        cancel.check()?;
        // Notes whose blob will not decode are indexed on metadata alone.
        let content = store
            .note_blob(pk)
            .ok()
            .and_then(|data| blob::decode(&data).ok())
            .map(|doc| doc.text)
            .unwrap_or_default();
        tx.execute(
            "INSERT INTO note_fts (note_id, title, snippet, folder, content) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                note.id,
                note.title,
                note.snippet.as_deref().unwrap_or(""),
                note.folder.as_deref().unwrap_or(""),
                content
            ],
        )?;
        if let Some(progress) = progress
            && (i + 1).is_multiple_of(PROGRESS_EVERY)
        {
            progress(i + 1, total);
        }
    }
    let now = unix_now();
    tx.execute(
        "INSERT INTO fts_meta (key, value) VALUES ('last_build', ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [now],
    )?;
    tx.commit()?;
    if let Some(progress) = progress {
        progress(total, total);
    }
    Ok(total)
}

fn is_stale(conn: &Connection, store: &NotesStore) -> Result<bool> {
    let Some(latest) = store.latest_modification()? else {
        return Ok(false);
    };
    let last_build: Option<f64> = conn
        .query_row(
            "SELECT value FROM fts_meta WHERE key = 'last_build'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let Some(last_build) = last_build else {
        return Ok(true);
    };
    let latest_unix = latest.unix_timestamp() as f64;
    Ok(latest_unix > last_build + STALENESS_SLACK_SECS)
}

/// Escape each whitespace token as an FTS5 phrase, joined with OR.
fn phrase_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn unix_now() -> f64 {
    let now = OffsetDateTime::now_utc();
    now.unix_timestamp() as f64
}
