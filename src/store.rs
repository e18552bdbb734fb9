//! Read-mostly accessor over the Apple Notes SQLite store.
//!
//! One connection per accessor instance, opened lazily read-only on first
//! use; the create-note path reopens read-write. Instances are not meant to
//! be shared across threads — background work opens its own accessor.

use crate::blob;
use crate::error::{Error, NotFoundKind, Result};
use crate::model::{
    Attachment, AttributeRun, FolderInfo, HASHTAG_UTI, Hashtag, LINK_UTI, NoteLink, NoteSummary,
    StyleTag, TABLE_UTI,
};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::debug;

/// Core-Data reference date: 2001-01-01T00:00:00Z.
pub const CORE_DATA_EPOCH_OFFSET: i64 = 978_307_200;

/// Entity discriminators for the rows the create-note path writes. Reads
/// inline the values in their SQL (5 = attachment, 14 = account,
/// 15 = folder).
const ENT_NOTE: i64 = 12;
const ENT_NOTE_DATA: i64 = 19;

const RECENTLY_DELETED: &str = "Recently Deleted";

/// Convert a stored Core-Data timestamp (seconds since 2001-01-01 UTC).
pub fn from_core_data(secs: f64) -> OffsetDateTime {
    let base = OffsetDateTime::from_unix_timestamp(CORE_DATA_EPOCH_OFFSET).expect("epoch in range");
    base + time::Duration::milliseconds((secs * 1000.0) as i64)
}

/// Convert an instant into the store's Core-Data representation.
pub fn to_core_data(t: OffsetDateTime) -> f64 {
    let millis = (t.unix_timestamp_nanos() / 1_000_000) as i64;
    millis as f64 / 1000.0 - CORE_DATA_EPOCH_OFFSET as f64
}

/// Filters for [`NotesStore::list_notes`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub folder: Option<String>,
    pub limit: Option<usize>,
    /// Include tombstoned notes and the "Recently Deleted" folder.
    pub include_deleted: bool,
}

#[derive(Debug)]
pub struct NotesStore {
    path: PathBuf,
    conn: RefCell<Option<Connection>>,
    writable: Cell<bool>,
    store_uuid: RefCell<Option<String>>,
}

impl NotesStore {
    /// Point at the store without opening it; the connection is established
    /// on first query.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::StoreUnavailable(format!(
                "no store at {}",
                path.display()
            )));
        }
        Ok(NotesStore {
            path,
            conn: RefCell::new(None),
            writable: Cell::new(false),
            store_uuid: RefCell::new(None),
        })
    }

    pub fn open_default() -> Result<Self> {
        let path = default_store_path()
            .ok_or_else(|| Error::StoreUnavailable("unsupported platform".into()))?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A second accessor over the same file, for background work that must
    /// not alias this instance's connection.
    pub fn reopen(&self) -> Result<NotesStore> {
        NotesStore::open(self.path.clone())
    }

    fn ensure_open(&self, write: bool) -> Result<()> {
        let need_reopen = {
            let conn = self.conn.borrow();
            conn.is_none() || (write && !self.writable.get())
        };
        if !need_reopen {
            return Ok(());
        }
        let flags = if write {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_SHARED_CACHE
        };
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), write, "opened notes store");
        *self.conn.borrow_mut() = Some(conn);
        self.writable.set(write);
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.ensure_open(false)?;
        let borrow = self.conn.borrow();
        let conn = borrow.as_ref().expect("connection opened above");
        f(conn)
    }

    fn with_write_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        self.ensure_open(true)?;
        let mut borrow = self.conn.borrow_mut();
        let conn = borrow.as_mut().expect("connection opened above");
        f(conn)
    }

    /// `Z_UUID` from the metadata table; part of every attachment id.
    pub fn store_uuid(&self) -> Result<String> {
        if let Some(uuid) = self.store_uuid.borrow().as_ref() {
            return Ok(uuid.clone());
        }
        let uuid: String = self.with_conn(|conn| {
            conn.query_row(
                "SELECT Z_UUID FROM Z_METADATA WHERE Z_VERSION = 1",
                [],
                |row| row.get(0),
            )
            .map_err(Error::from)
        })?;
        *self.store_uuid.borrow_mut() = Some(uuid.clone());
        Ok(uuid)
    }

    /// Live notes joined with their folder, newest first.
    pub fn list_notes(&self, opts: &ListOptions) -> Result<Vec<NoteSummary>> {
        Ok(self
            .list_note_rows(opts)?
            .into_iter()
            .map(|(_, summary)| summary)
            .collect())
    }

    /// Like [`list_notes`], with the row primary key for blob lookups.
    pub(crate) fn list_note_rows(&self, opts: &ListOptions) -> Result<Vec<(i64, NoteSummary)>> {
        let mut sql = String::from(
            "SELECT n.Z_PK, n.ZIDENTIFIER, n.ZTITLE1, f.ZTITLE2, \
             n.ZCREATIONDATE1, n.ZMODIFICATIONDATE1, n.ZSNIPPET \
             FROM ZICCLOUDSYNCINGOBJECT n \
             LEFT JOIN ZICCLOUDSYNCINGOBJECT f ON f.Z_PK = n.ZFOLDER AND f.Z_ENT = 15 \
             WHERE n.Z_ENT = 12 AND n.ZTITLE1 IS NOT NULL",
        );
        let mut binds: Vec<Value> = Vec::new();
        if !opts.include_deleted {
            sql.push_str(" AND IFNULL(n.ZMARKEDFORDELETION, 0) = 0");
            sql.push_str(" AND IFNULL(f.ZTITLE2, '') <> ?");
            binds.push(Value::Text(RECENTLY_DELETED.into()));
        }
        if let Some(folder) = &opts.folder {
            sql.push_str(" AND lower(f.ZTITLE2) = lower(?)");
            binds.push(Value::Text(folder.clone()));
        }
        sql.push_str(" ORDER BY n.ZMODIFICATIONDATE1 DESC");
        if let Some(limit) = opts.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Value::Integer(limit as i64));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let iter = stmt.query_map(params_from_iter(binds.iter()), note_summary_row)?;
            let mut out = Vec::new();
            for row in iter {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Run a caller-built summary query (the basic-search SQL) with its
    /// bind list, in declared order.
    pub(crate) fn query_summaries(
        &self,
        sql: &str,
        binds: &[Value],
    ) -> Result<Vec<(i64, NoteSummary)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let iter = stmt.query_map(params_from_iter(binds.iter()), note_summary_row)?;
            let mut out = Vec::new();
            for row in iter {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// The staleness oracle shared by every derived index.
    pub fn latest_modification(&self) -> Result<Option<OffsetDateTime>> {
        self.with_conn(|conn| {
            let max: Option<f64> = conn.query_row(
                "SELECT MAX(ZMODIFICATIONDATE1) FROM ZICCLOUDSYNCINGOBJECT WHERE Z_ENT = 12",
                [],
                |row| row.get(0),
            )?;
            Ok(max.map(from_core_data))
        })
    }

    pub fn note_by_uuid(&self, uuid: &str) -> Result<NoteSummary> {
        Ok(self.note_row_by_uuid(uuid)?.1)
    }

    pub(crate) fn note_row_by_uuid(&self, uuid: &str) -> Result<(i64, NoteSummary)> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT n.Z_PK, n.ZIDENTIFIER, n.ZTITLE1, f.ZTITLE2, \
                 n.ZCREATIONDATE1, n.ZMODIFICATIONDATE1, n.ZSNIPPET \
                 FROM ZICCLOUDSYNCINGOBJECT n \
                 LEFT JOIN ZICCLOUDSYNCINGOBJECT f ON f.Z_PK = n.ZFOLDER AND f.Z_ENT = 15 \
                 WHERE n.Z_ENT = 12 AND n.ZIDENTIFIER = ?",
                [uuid],
                note_summary_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(NotFoundKind::Note, uuid))
        })
    }

    pub fn note_by_pk(&self, pk: i64) -> Result<NoteSummary> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT n.Z_PK, n.ZIDENTIFIER, n.ZTITLE1, f.ZTITLE2, \
                 n.ZCREATIONDATE1, n.ZMODIFICATIONDATE1, n.ZSNIPPET \
                 FROM ZICCLOUDSYNCINGOBJECT n \
                 LEFT JOIN ZICCLOUDSYNCINGOBJECT f ON f.Z_PK = n.ZFOLDER AND f.Z_ENT = 15 \
                 WHERE n.Z_ENT = 12 AND n.Z_PK = ?",
                [pk],
                note_summary_row,
            )
            .optional()?
            .map(|(_, summary)| summary)
            .ok_or_else(|| Error::not_found(NotFoundKind::Note, pk.to_string()))
        })
    }

    /// The raw `ZDATA` blob for a note. A note with no data row is NotFound;
    /// a NULL blob decodes as an empty document.
    pub fn note_blob(&self, note_pk: i64) -> Result<Vec<u8>> {
        self.with_conn(|conn| {
            let data: Option<Option<Vec<u8>>> = conn
                .query_row(
                    "SELECT ZDATA FROM ZICNOTEDATA WHERE ZNOTE = ? LIMIT 1",
                    [note_pk],
                    |row| row.get(0),
                )
                .optional()?;
            data.map(Option::unwrap_or_default)
                .ok_or_else(|| Error::not_found(NotFoundKind::Note, note_pk.to_string()))
        })
    }

    /// The mergeable-data blob for an embedded table, if the UUID names one.
    pub fn table_blob(&self, uuid: &str) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            let data: Option<Option<Vec<u8>>> = conn
                .query_row(
                    "SELECT ZMERGEABLEDATA1 FROM ZICCLOUDSYNCINGOBJECT \
                     WHERE ZIDENTIFIER = ?1 AND (ZTYPEUTI = ?2 OR ZTYPEUTI1 = ?2)",
                    params![uuid, TABLE_UTI],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.flatten())
        })
    }

    /// Folders with their account, in canonical order: primary account
    /// first, "Notes" first within an account, the rest by creation order.
    /// Folders with no live notes and "Recently Deleted" are omitted.
    pub fn list_folders(&self) -> Result<Vec<FolderInfo>> {
        struct Row {
            name: String,
            account: String,
            account_pk: i64,
            created: f64,
            note_count: i64,
        }

        let mut rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.ZTITLE2, IFNULL(a.ZNAME, ''), IFNULL(f.ZACCOUNT8, 0), \
                 IFNULL(f.ZCREATIONDATE1, 0), \
                 (SELECT COUNT(*) FROM ZICCLOUDSYNCINGOBJECT n \
                  WHERE n.Z_ENT = 12 AND n.ZFOLDER = f.Z_PK \
                  AND n.ZTITLE1 IS NOT NULL \
                  AND IFNULL(n.ZMARKEDFORDELETION, 0) = 0) \
                 FROM ZICCLOUDSYNCINGOBJECT f \
                 LEFT JOIN ZICCLOUDSYNCINGOBJECT a \
                 ON a.Z_PK = f.ZACCOUNT8 AND a.Z_ENT = 14 \
                 WHERE f.Z_ENT = 15 AND f.ZTITLE2 IS NOT NULL \
                 AND IFNULL(f.ZMARKEDFORDELETION, 0) = 0",
            )?;
            let iter = stmt.query_map([], |row| {
                Ok(Row {
                    name: row.get(0)?,
                    account: row.get(1)?,
                    account_pk: row.get(2)?,
                    created: row.get(3)?,
                    note_count: row.get(4)?,
                })
            })?;
            let mut out = Vec::new();
            for r in iter {
                out.push(r?);
            }
            Ok(out)
        })?;

        rows.retain(|r| r.note_count > 0 && r.name != RECENTLY_DELETED);
        rows.sort_by(|a, b| {
            (a.account_pk, a.name != "Notes")
                .cmp(&(b.account_pk, b.name != "Notes"))
                .then(a.created.total_cmp(&b.created))
        });
        Ok(rows
            .into_iter()
            .map(|r| FolderInfo {
                name: r.name,
                account: r.account,
                note_count: r.note_count,
            })
            .collect())
    }

    /// Hashtags attached inline to a note.
    pub fn hashtags(&self, note_pk: i64) -> Result<Vec<Hashtag>> {
        let rows = self.inline_attachments(note_pk, HASHTAG_UTI)?;
        Ok(rows
            .into_iter()
            .filter_map(|(alt_text, _)| alt_text)
            .map(|text| Hashtag { text })
            .collect())
    }

    /// Inter-note links attached inline to a note.
    pub fn note_links(&self, note_pk: i64) -> Result<Vec<NoteLink>> {
        let rows = self.inline_attachments(note_pk, LINK_UTI)?;
        Ok(rows
            .into_iter()
            .map(|(alt_text, url)| NoteLink {
                text: alt_text.unwrap_or_default(),
                target: url.as_deref().and_then(parse_note_link_target),
            })
            .collect())
    }

    /// Inline-attachment rows for a note, matched over both note foreign
    /// keys and the attachment back-reference.
    fn inline_attachments(
        &self,
        note_pk: i64,
        uti: &str,
    ) -> Result<Vec<(Option<String>, Option<String>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ZALTTEXT, ZTOKENCONTENTIDENTIFIER FROM ZICCLOUDSYNCINGOBJECT \
                 WHERE (ZTYPEUTI = ?1 OR ZTYPEUTI1 = ?1) \
                 AND (ZNOTE = ?2 OR ZNOTE1 = ?2 OR ZATTACHMENT IN \
                      (SELECT Z_PK FROM ZICCLOUDSYNCINGOBJECT \
                       WHERE Z_ENT = 5 AND ZNOTE = ?2)) \
                 ORDER BY Z_PK",
            )?;
            let iter = stmt.query_map(params![uti, note_pk], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let mut out = Vec::new();
            for r in iter {
                out.push(r?);
            }
            Ok(out)
        })
    }

    /// Attachment metadata rows for a note.
    pub fn list_attachments(&self, note_pk: i64) -> Result<Vec<Attachment>> {
        let store_uuid = self.store_uuid()?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT Z_PK, IFNULL(ZIDENTIFIER, ''), ZTITLE1, ZTYPEUTI, ZFILESIZE, \
                 IFNULL(ZCREATIONDATE1, 0), IFNULL(ZMODIFICATIONDATE1, 0) \
                 FROM ZICCLOUDSYNCINGOBJECT \
                 WHERE Z_ENT = 5 AND ZNOTE = ? ORDER BY Z_PK",
            )?;
            let iter = stmt.query_map([note_pk], |row| {
                let pk: i64 = row.get(0)?;
                Ok(Attachment {
                    id: format!("x-coredata://{store_uuid}/ICAttachment/p{pk}"),
                    identifier: row.get(1)?,
                    name: row.get(2)?,
                    type_uti: row.get(3)?,
                    file_size: row.get(4)?,
                    created_at: from_core_data(row.get(5)?),
                    modified_at: from_core_data(row.get(6)?),
                })
            })?;
            let mut out = Vec::new();
            for r in iter {
                out.push(r?);
            }
            Ok(out)
        })
    }

    /// Insert a note the low-level way: allocate primary keys, write the
    /// encoded blob, write the note row — all in one transaction. This does
    /// not notify the sync layer; callers decide whether that matters.
    pub fn create_note(&self, folder: &str, title: &str, body: &str) -> Result<NoteSummary> {
        let now = to_core_data(OffsetDateTime::now_utc());
        let uuid = uuid::Uuid::new_v4().to_string().to_uppercase();
        let text = if body.is_empty() {
            title.to_string()
        } else {
            format!("{title}\n{body}")
        };
        let title_len = title.chars().count() + usize::from(!body.is_empty());
        let mut runs = vec![AttributeRun::plain(title_len, StyleTag::Title)];
        if !body.is_empty() {
            runs.push(AttributeRun::plain(body.chars().count(), StyleTag::Body));
        }
        let data = blob::encode(&text, &runs)?;
        let snippet = body.lines().next().unwrap_or("").to_string();

        self.with_write_conn(|conn| {
            let tx = conn.transaction()?;

            let (folder_pk, account_pk): (i64, Option<i64>) = tx
                .query_row(
                    "SELECT Z_PK, ZACCOUNT8 FROM ZICCLOUDSYNCINGOBJECT \
                     WHERE Z_ENT = 15 AND lower(ZTITLE2) = lower(?)",
                    [folder],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| Error::not_found(NotFoundKind::Folder, folder))?;

            let note_pk = allocate_pk(&tx, ENT_NOTE)?;
            let data_pk = allocate_pk(&tx, ENT_NOTE_DATA)?;

            tx.execute(
                "INSERT INTO ZICNOTEDATA (Z_PK, Z_ENT, ZNOTE, ZDATA) VALUES (?, ?, ?, ?)",
                params![data_pk, ENT_NOTE_DATA, note_pk, data],
            )?;
            tx.execute(
                "INSERT INTO ZICCLOUDSYNCINGOBJECT \
                 (Z_PK, Z_ENT, ZIDENTIFIER, ZTITLE1, ZSNIPPET, ZFOLDER, ZACCOUNT8, \
                  ZCREATIONDATE1, ZMODIFICATIONDATE1, ZMARKEDFORDELETION) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
                params![
                    note_pk,
                    ENT_NOTE,
                    uuid,
                    title,
                    snippet,
                    folder_pk,
                    account_pk,
                    now,
                    now
                ],
            )?;

            tx.commit()?;
            debug!(note_pk, %uuid, "created note");
            Ok(NoteSummary {
                id: uuid.clone(),
                title: title.to_string(),
                folder: Some(folder.to_string()),
                created_at: from_core_data(now),
                modified_at: from_core_data(now),
                snippet: if snippet.is_empty() {
                    None
                } else {
                    Some(snippet.clone())
                },
            })
        })
    }
}

/// Next primary key from the store's allocator, read-modify-written inside
/// the caller's transaction. Never cached: other processes bump it too.
fn allocate_pk(tx: &rusqlite::Transaction<'_>, ent: i64) -> Result<i64> {
    let max: i64 = tx
        .query_row(
            "SELECT Z_MAX FROM Z_PRIMARYKEY WHERE Z_ENT = ?",
            [ent],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::QueryFailed(format!("no allocator row for entity {ent}")))?;
    let next = max + 1;
    tx.execute(
        "UPDATE Z_PRIMARYKEY SET Z_MAX = ? WHERE Z_ENT = ?",
        params![next, ent],
    )?;
    Ok(next)
}

fn note_summary_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, NoteSummary)> {
    let pk: i64 = row.get(0)?;
    let created: Option<f64> = row.get(4)?;
    let modified: Option<f64> = row.get(5)?;
    Ok((
        pk,
        NoteSummary {
            id: row.get(1)?,
            title: row.get(2)?,
            folder: row.get(3)?,
            created_at: from_core_data(created.unwrap_or(0.0)),
            modified_at: from_core_data(modified.unwrap_or(0.0)),
            snippet: row.get(6)?,
        },
    ))
}

/// `applenotes:note/<UUID>[?…]` → the UUID.
fn parse_note_link_target(url: &str) -> Option<String> {
    let rest = url.strip_prefix("applenotes:note/")?;
    let uuid = rest.split('?').next()?;
    if uuid.is_empty() {
        None
    } else {
        Some(uuid.to_string())
    }
}

fn default_store_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home).join("Library/Group Containers/group.com.apple.notes/NoteStore.sqlite"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureStore;
    use tempfile::tempdir;
    use time::macros::datetime;

    #[test]
    fn core_data_epoch_roundtrips_integer_seconds() {
        for t in [0i64, 1, 726_710_400, -978_307_200, 1_000_000_000] {
            let instant = from_core_data(t as f64);
            assert_eq!(to_core_data(instant), t as f64);
        }
    }

    #[test]
    fn core_data_epoch_matches_known_instant() {
        // 2024-01-12T00:00:00Z is 726710400 seconds after 2001-01-01T00:00:00Z
        // (unix 1705017600 − 978307200).
        let instant = from_core_data(726_710_400.0);
        assert_eq!(instant, datetime!(2024-01-12 00:00:00 UTC));
        assert_eq!(to_core_data(datetime!(2024-01-12 00:00:00 UTC)), 726_710_400.0);
    }

    #[test]
    fn missing_store_file_is_unavailable() {
        let err = NotesStore::open("/nonexistent/NoteStore.sqlite").unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[test]
    fn list_notes_excludes_tombstones_and_recently_deleted() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 10.0).unwrap();
        let trash = fixture.add_folder(RECENTLY_DELETED, 20.0).unwrap();
        fixture.add_note(folder, "Alive", "body", 100.0, 200.0).unwrap();
        let dead = fixture.add_note(folder, "Dead", "body", 100.0, 300.0).unwrap();
        fixture.mark_deleted(dead).unwrap();
        fixture.add_note(trash, "Trashed", "body", 100.0, 400.0).unwrap();

        let store = fixture.store().unwrap();
        let notes = store.list_notes(&ListOptions::default()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Alive");

        let all = store
            .list_notes(&ListOptions {
                include_deleted: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn list_notes_orders_by_modified_desc_and_limits() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 10.0).unwrap();
        fixture.add_note(folder, "Oldest", "", 1.0, 100.0).unwrap();
        fixture.add_note(folder, "Newest", "", 1.0, 300.0).unwrap();
        fixture.add_note(folder, "Middle", "", 1.0, 200.0).unwrap();

        let store = fixture.store().unwrap();
        let notes = store.list_notes(&ListOptions::default()).unwrap();
        let titles: Vec<&str> = notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, ["Newest", "Middle", "Oldest"]);

        let limited = store
            .list_notes(&ListOptions {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn list_notes_filters_by_folder_case_insensitively() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let work = fixture.add_folder("Work", 10.0).unwrap();
        let home = fixture.add_folder("Home", 20.0).unwrap();
        fixture.add_note(work, "W", "", 1.0, 2.0).unwrap();
        fixture.add_note(home, "H", "", 1.0, 2.0).unwrap();

        let store = fixture.store().unwrap();
        let notes = store
            .list_notes(&ListOptions {
                folder: Some("work".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "W");
    }

    #[test]
    fn latest_modification_is_the_max_over_notes() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 10.0).unwrap();
        fixture.add_note(folder, "A", "", 1.0, 111.0).unwrap();
        fixture.add_note(folder, "B", "", 1.0, 555.0).unwrap();

        let store = fixture.store().unwrap();
        let latest = store.latest_modification().unwrap().unwrap();
        assert_eq!(latest, from_core_data(555.0));
    }

    #[test]
    fn note_lookup_by_uuid_and_blob_fetch() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 10.0).unwrap();
        let pk = fixture.add_note(folder, "Hello", "World", 1.0, 2.0).unwrap();

        let store = fixture.store().unwrap();
        let summary = store.note_by_pk(pk).unwrap();
        let (found_pk, by_uuid) = store.note_row_by_uuid(&summary.id).unwrap();
        assert_eq!(found_pk, pk);
        assert_eq!(by_uuid.title, "Hello");

        let data = store.note_blob(pk).unwrap();
        let doc = blob::decode(&data).unwrap();
        assert!(doc.text.contains("World"));

        let missing = store.note_row_by_uuid("NO-SUCH-UUID").unwrap_err();
        assert!(matches!(
            missing,
            Error::NotFound {
                kind: NotFoundKind::Note,
                ..
            }
        ));
    }

    #[test]
    fn folder_listing_is_canonically_ordered() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let other_account = fixture.add_account("Work").unwrap();
        let zebra = fixture.add_folder("Zebra", 5.0).unwrap();
        let notes = fixture.add_folder("Notes", 50.0).unwrap();
        let alpha = fixture.add_folder("Alpha", 10.0).unwrap();
        let empty = fixture.add_folder("Empty", 1.0).unwrap();
        let work = fixture
            .add_folder_in_account("Projects", other_account, 1.0)
            .unwrap();
        let trash = fixture.add_folder(RECENTLY_DELETED, 99.0).unwrap();
        for f in [zebra, notes, alpha, work, trash] {
            fixture.add_note(f, "n", "", 1.0, 1.0).unwrap();
        }
        let _ = empty; // zero live notes, must be omitted

        let store = fixture.store().unwrap();
        let folders = store.list_folders().unwrap();
        let names: Vec<&str> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Notes", "Zebra", "Alpha", "Projects"]);
        assert_eq!(folders[0].account, "iCloud");
        assert_eq!(folders[3].account, "Work");
    }

    #[test]
    fn hashtags_and_links_come_from_inline_rows() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 10.0).unwrap();
        let pk = fixture.add_note(folder, "Tagged", "body", 1.0, 2.0).unwrap();
        fixture.add_hashtag(pk, "#rust").unwrap();
        fixture
            .add_link(pk, "Other note", "applenotes:note/ABC-DEF?ownerIdentifier=x")
            .unwrap();

        let store = fixture.store().unwrap();
        let tags = store.hashtags(pk).unwrap();
        assert_eq!(tags, vec![Hashtag { text: "#rust".into() }]);

        let links = store.note_links(pk).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "Other note");
        assert_eq!(links[0].target.as_deref(), Some("ABC-DEF"));
    }

    #[test]
    fn attachment_ids_use_the_coredata_scheme() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 10.0).unwrap();
        let pk = fixture.add_note(folder, "Has file", "", 1.0, 2.0).unwrap();
        let att_pk = fixture
            .add_attachment(pk, "ATT-1", Some("photo.png"), "public.png", 1234)
            .unwrap();

        let store = fixture.store().unwrap();
        let attachments = store.list_attachments(pk).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(
            attachments[0].id,
            format!("x-coredata://{}/ICAttachment/p{att_pk}", fixture.store_uuid())
        );
        assert_eq!(attachments[0].file_size, Some(1234));
    }

    #[test]
    fn create_note_allocates_pks_and_is_listed() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        fixture.add_folder("Notes", 10.0).unwrap();

        let store = fixture.store().unwrap();
        let created = store
            .create_note("Notes", "Fresh", "First line\nSecond line")
            .unwrap();
        assert_eq!(created.snippet.as_deref(), Some("First line"));

        let (pk, summary) = store.note_row_by_uuid(&created.id).unwrap();
        assert_eq!(summary.title, "Fresh");
        let doc = blob::decode(&store.note_blob(pk).unwrap()).unwrap();
        assert_eq!(doc.text, "Fresh\nFirst line\nSecond line");
        assert_eq!(doc.runs[0].style, StyleTag::Title);

        // The allocator advanced for both entities.
        let conn = Connection::open(fixture.path()).unwrap();
        let max_note: i64 = conn
            .query_row(
                "SELECT Z_MAX FROM Z_PRIMARYKEY WHERE Z_ENT = 12",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(max_note, pk);
    }

    #[test]
    fn create_note_in_missing_folder_rolls_back() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        fixture.add_folder("Notes", 10.0).unwrap();

        let store = fixture.store().unwrap();
        let err = store.create_note("Missing", "T", "B").unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: NotFoundKind::Folder,
                ..
            }
        ));
        // Nothing was inserted.
        assert!(store.list_notes(&ListOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn note_link_target_parsing() {
        assert_eq!(
            parse_note_link_target("applenotes:note/UUID-1?x=1").as_deref(),
            Some("UUID-1")
        );
        assert_eq!(
            parse_note_link_target("applenotes:note/UUID-2").as_deref(),
            Some("UUID-2")
        );
        assert_eq!(parse_note_link_target("https://example.com"), None);
        assert_eq!(parse_note_link_target("applenotes:note/"), None);
    }
}
