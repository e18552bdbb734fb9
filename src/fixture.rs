//! Builds a schema-complete NoteStore file for tests and local development.
//!
//! The fixture mirrors the column set the accessor reads and writes, seeds
//! the metadata and primary-key allocator tables, and encodes real blobs so
//! the decode pipeline is exercised end to end.

use crate::blob;
use crate::error::{Error, Result};
use crate::model::{AttributeRun, HASHTAG_UTI, LINK_UTI, StyleTag, TABLE_UTI};
use crate::store::NotesStore;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

const STORE_UUID: &str = "FIXTURE-UUID-0000";

#[derive(Debug)]
pub struct FixtureStore {
    path: PathBuf,
    icloud_account_pk: i64,
}

impl FixtureStore {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", path.display())))?;

        conn.execute_batch(
            "CREATE TABLE Z_METADATA (
                Z_VERSION INTEGER PRIMARY KEY,
                Z_UUID VARCHAR(255),
                Z_PLIST BLOB
            );
            CREATE TABLE ZICCLOUDSYNCINGOBJECT (
                Z_PK INTEGER PRIMARY KEY,
                Z_ENT INTEGER,
                ZNAME VARCHAR,
                ZIDENTIFIER VARCHAR,
                ZTITLE1 VARCHAR,
                ZTITLE2 VARCHAR,
                ZSNIPPET VARCHAR,
                ZFOLDER INTEGER,
                ZACCOUNT8 INTEGER,
                ZCREATIONDATE1 FLOAT,
                ZMODIFICATIONDATE1 FLOAT,
                ZMARKEDFORDELETION INTEGER,
                ZTYPEUTI VARCHAR,
                ZTYPEUTI1 VARCHAR,
                ZALTTEXT VARCHAR,
                ZTOKENCONTENTIDENTIFIER VARCHAR,
                ZNOTE INTEGER,
                ZNOTE1 INTEGER,
                ZATTACHMENT INTEGER,
                ZFILESIZE INTEGER,
                ZMERGEABLEDATA1 BLOB
            );
            CREATE TABLE ZICNOTEDATA (
                Z_PK INTEGER PRIMARY KEY,
                Z_ENT INTEGER,
                ZNOTE INTEGER,
                ZDATA BLOB
            );
            CREATE TABLE Z_PRIMARYKEY (
                Z_ENT INTEGER PRIMARY KEY,
                Z_NAME VARCHAR,
                Z_MAX INTEGER
            );",
        )?;
        conn.execute(
            "INSERT INTO Z_METADATA (Z_VERSION, Z_UUID) VALUES (1, ?)",
            [STORE_UUID],
        )?;
        for (ent, name) in [
            (5, "ICAttachment"),
            (12, "ICNote"),
            (14, "ICAccount"),
            (15, "ICFolder"),
            (19, "ICNoteData"),
        ] {
            conn.execute(
                "INSERT INTO Z_PRIMARYKEY (Z_ENT, Z_NAME, Z_MAX) VALUES (?, ?, 0)",
                params![ent, name],
            )?;
        }

        let fixture = FixtureStore {
            path,
            icloud_account_pk: 0,
        };
        let icloud = fixture.add_account("iCloud")?;
        Ok(FixtureStore {
            icloud_account_pk: icloud,
            ..fixture
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_uuid(&self) -> &'static str {
        STORE_UUID
    }

    /// A fresh accessor over the fixture file.
    pub fn store(&self) -> Result<NotesStore> {
        NotesStore::open(self.path.clone())
    }

    fn conn(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", self.path.display())))
    }

    /// Entities sharing the `ZICCLOUDSYNCINGOBJECT` table share one Z_PK
    /// space; their allocator rows advance together. `ZICNOTEDATA` has its
    /// own table and its own counter.
    fn next_pk(&self, conn: &Connection, ent: i64) -> Result<i64> {
        if ent == 19 {
            let max: i64 = conn.query_row(
                "SELECT Z_MAX FROM Z_PRIMARYKEY WHERE Z_ENT = 19",
                [],
                |row| row.get(0),
            )?;
            let next = max + 1;
            conn.execute("UPDATE Z_PRIMARYKEY SET Z_MAX = ? WHERE Z_ENT = 19", [next])?;
            return Ok(next);
        }
        let max: i64 = conn.query_row(
            "SELECT MAX(Z_MAX) FROM Z_PRIMARYKEY WHERE Z_ENT IN (5, 12, 14, 15)",
            [],
            |row| row.get(0),
        )?;
        let next = max + 1;
        conn.execute(
            "UPDATE Z_PRIMARYKEY SET Z_MAX = ? WHERE Z_ENT IN (5, 12, 14, 15)",
            [next],
        )?;
        Ok(next)
    }

    pub fn add_account(&self, name: &str) -> Result<i64> {
        let conn = self.conn()?;
        let pk = self.next_pk(&conn, 14)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT (Z_PK, Z_ENT, ZNAME, ZIDENTIFIER) \
             VALUES (?, 14, ?, ?)",
            params![pk, name, format!("ACCOUNT-{pk}")],
        )?;
        Ok(pk)
    }

    /// Folder in the default (iCloud) account.
    pub fn add_folder(&self, name: &str, created: f64) -> Result<i64> {
        self.add_folder_in_account(name, self.icloud_account_pk, created)
    }

    pub fn add_folder_in_account(&self, name: &str, account_pk: i64, created: f64) -> Result<i64> {
        let conn = self.conn()?;
        let pk = self.next_pk(&conn, 15)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT \
             (Z_PK, Z_ENT, ZIDENTIFIER, ZTITLE2, ZACCOUNT8, ZCREATIONDATE1, ZMARKEDFORDELETION) \
             VALUES (?, 15, ?, ?, ?, ?, 0)",
            params![pk, format!("FOLDER-{pk}"), name, account_pk, created],
        )?;
        Ok(pk)
    }

    /// Note with a Title run over the title line and a Body run over the rest.
    pub fn add_note(
        &self,
        folder_pk: i64,
        title: &str,
        body: &str,
        created: f64,
        modified: f64,
    ) -> Result<i64> {
        let text = if body.is_empty() {
            format!("{title}\n")
        } else {
            format!("{title}\n{body}")
        };
        let title_len = title.chars().count() + 1;
        let mut runs = vec![AttributeRun::plain(title_len, StyleTag::Title)];
        let rest = text.chars().count() - title_len;
        if rest > 0 {
            runs.push(AttributeRun::plain(rest, StyleTag::Body));
        }
        self.add_note_with_document(folder_pk, title, &text, &runs, created, modified)
    }

    /// Note whose `ZDATA` is the given bytes verbatim (e.g. a hand-framed
    /// blob with embedded-object runs).
    pub fn add_note_raw(
        &self,
        folder_pk: i64,
        title: &str,
        data: &[u8],
        created: f64,
        modified: f64,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let note_pk = self.next_pk(&conn, 12)?;
        let data_pk = self.next_pk(&conn, 19)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT \
             (Z_PK, Z_ENT, ZIDENTIFIER, ZTITLE1, ZFOLDER, \
              ZCREATIONDATE1, ZMODIFICATIONDATE1, ZMARKEDFORDELETION) \
             VALUES (?, 12, ?, ?, ?, ?, ?, 0)",
            params![
                note_pk,
                format!("NOTE-{note_pk}"),
                title,
                folder_pk,
                created,
                modified
            ],
        )?;
        conn.execute(
            "INSERT INTO ZICNOTEDATA (Z_PK, Z_ENT, ZNOTE, ZDATA) VALUES (?, 19, ?, ?)",
            params![data_pk, note_pk, data],
        )?;
        Ok(note_pk)
    }

    /// Note with caller-supplied text and runs, for decode-sensitive tests.
    pub fn add_note_with_document(
        &self,
        folder_pk: i64,
        title: &str,
        text: &str,
        runs: &[AttributeRun],
        created: f64,
        modified: f64,
    ) -> Result<i64> {
        let data = blob::encode(text, runs)?;
        let snippet = text
            .lines()
            .nth(1)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        let conn = self.conn()?;
        let note_pk = self.next_pk(&conn, 12)?;
        let data_pk = self.next_pk(&conn, 19)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT \
             (Z_PK, Z_ENT, ZIDENTIFIER, ZTITLE1, ZSNIPPET, ZFOLDER, \
              ZCREATIONDATE1, ZMODIFICATIONDATE1, ZMARKEDFORDELETION) \
             VALUES (?, 12, ?, ?, ?, ?, ?, ?, 0)",
            params![
                note_pk,
                format!("NOTE-{note_pk}"),
                title,
                snippet,
                folder_pk,
                created,
                modified
            ],
        )?;
        conn.execute(
            "INSERT INTO ZICNOTEDATA (Z_PK, Z_ENT, ZNOTE, ZDATA) VALUES (?, 19, ?, ?)",
            params![data_pk, note_pk, data],
        )?;
        Ok(note_pk)
    }

    pub fn mark_deleted(&self, note_pk: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE ZICCLOUDSYNCINGOBJECT SET ZMARKEDFORDELETION = 1 WHERE Z_PK = ?",
            [note_pk],
        )?;
        Ok(())
    }

    pub fn touch_note(&self, note_pk: i64, modified: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE ZICCLOUDSYNCINGOBJECT SET ZMODIFICATIONDATE1 = ? WHERE Z_PK = ?",
            params![modified, note_pk],
        )?;
        Ok(())
    }

    /// A mergeable-data row for an embedded table, cells row-major.
    pub fn add_table_blob(&self, uuid: &str, cells: &[&str]) -> Result<i64> {
        use crate::wire::Writer;
        let mut root = Writer::new();
        root.message_field(1, |doc| {
            for cell in cells {
                doc.message_field(3, |op| {
                    op.message_field(10, |m| {
                        m.varint_field(1, 7);
                        m.string_field(2, cell);
                    });
                });
            }
        });
        let data = root.into_bytes();

        let conn = self.conn()?;
        let pk = self.next_pk(&conn, 5)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT \
             (Z_PK, Z_ENT, ZIDENTIFIER, ZTYPEUTI, ZMERGEABLEDATA1) \
             VALUES (?, 5, ?, ?, ?)",
            params![pk, uuid, TABLE_UTI, data],
        )?;
        Ok(pk)
    }

    pub fn add_hashtag(&self, note_pk: i64, text: &str) -> Result<i64> {
        let conn = self.conn()?;
        let pk = self.next_pk(&conn, 5)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT \
             (Z_PK, Z_ENT, ZIDENTIFIER, ZTYPEUTI, ZALTTEXT, ZNOTE) \
             VALUES (?, 5, ?, ?, ?, ?)",
            params![pk, format!("TAG-{pk}"), HASHTAG_UTI, text, note_pk],
        )?;
        Ok(pk)
    }

    pub fn add_link(&self, note_pk: i64, text: &str, url: &str) -> Result<i64> {
        let conn = self.conn()?;
        let pk = self.next_pk(&conn, 5)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT \
             (Z_PK, Z_ENT, ZIDENTIFIER, ZTYPEUTI1, ZALTTEXT, ZTOKENCONTENTIDENTIFIER, ZNOTE1) \
             VALUES (?, 5, ?, ?, ?, ?, ?)",
            params![pk, format!("LINK-{pk}"), LINK_UTI, text, url, note_pk],
        )?;
        Ok(pk)
    }

    pub fn add_attachment(
        &self,
        note_pk: i64,
        identifier: &str,
        name: Option<&str>,
        type_uti: &str,
        file_size: i64,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let pk = self.next_pk(&conn, 5)?;
        conn.execute(
            "INSERT INTO ZICCLOUDSYNCINGOBJECT \
             (Z_PK, Z_ENT, ZIDENTIFIER, ZTITLE1, ZTYPEUTI, ZFILESIZE, ZNOTE, \
              ZCREATIONDATE1, ZMODIFICATIONDATE1) \
             VALUES (?, 5, ?, ?, ?, ?, ?, 0, 0)",
            params![pk, identifier, name, type_uti, file_size, note_pk],
        )?;
        Ok(pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fixture_seeds_metadata_and_allocator() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let store = fixture.store().unwrap();
        assert_eq!(store.store_uuid().unwrap(), STORE_UUID);
    }

    #[test]
    fn fixture_notes_decode_through_the_real_pipeline() {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        let pk = fixture
            .add_note(folder, "Title here", "Body line", 1.0, 2.0)
            .unwrap();

        let store = fixture.store().unwrap();
        let doc = blob::decode(&store.note_blob(pk).unwrap()).unwrap();
        assert_eq!(doc.text, "Title here\nBody line");
        let covered: usize = doc.runs.iter().map(|r| r.length).sum();
        assert_eq!(covered, doc.text.chars().count());
    }
}
