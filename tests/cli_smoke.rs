use notes_bridge::{FixtureStore, to_core_data};
use predicates::prelude::*;
use tempfile::TempDir;
use time::OffsetDateTime;

fn seeded_store(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("NoteStore.sqlite");
    let fixture = FixtureStore::create(&path).unwrap();
    let folder = fixture.add_folder("Notes", 1.0).unwrap();
    let now = to_core_data(OffsetDateTime::now_utc());
    fixture
        .add_note(folder, "kubectl tricks", "useful flags", now - 10.0, now - 10.0)
        .unwrap();
    fixture
        .add_note(folder, "Groceries", "apples and oranges", now - 5.0, now - 5.0)
        .unwrap();
    path
}

fn bridge(store: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo_bin_cmd!("notes-bridge");
    cmd.arg("--store")
        .arg(store)
        .env("NO_COLOR", "1")
        .env("NO_PROGRESS", "1")
        .env("COLUMNS", "120");
    cmd
}

#[test]
fn notes_list_prints_titles() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    bridge(&store)
        .args(["notes", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kubectl tricks"))
        .stdout(predicate::str::contains("Groceries"));
}

#[test]
fn notes_list_json_is_parseable() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    let out = bridge(&store)
        .args(["--json", "notes", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let notes: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(notes.as_array().unwrap().len(), 2);
}

#[test]
fn search_finds_and_tags_results() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    bridge(&store)
        .args(["search", "kubectl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("basic"))
        .stdout(predicate::str::contains("kubectl tricks"));
}

#[test]
fn search_with_fts_uses_a_local_cache_dir() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    let cache = dir.path().join("cache");
    bridge(&store)
        .arg("--cache-dir")
        .arg(&cache)
        .args(["search", "apples", "--fts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Groceries"));
    assert!(cache.join("fts.sqlite").exists());
}

#[test]
fn folders_list_shows_accounts() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    bridge(&store)
        .args(["folders", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("iCloud"))
        .stdout(predicate::str::contains("Notes"));
}

#[test]
fn show_renders_body_text() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    let out = bridge(&store)
        .args(["--json", "notes", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let notes: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let id = notes[0]["id"].as_str().unwrap();

    bridge(&store)
        .args(["notes", "show", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("apples and oranges"));
}

#[test]
fn attachments_list_shows_metadata() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("NoteStore.sqlite");
    let fixture = FixtureStore::create(&path).unwrap();
    let folder = fixture.add_folder("Notes", 1.0).unwrap();
    let pk = fixture.add_note(folder, "With file", "", 1.0, 2.0).unwrap();
    fixture
        .add_attachment(pk, "ATT-1", Some("scan.pdf"), "com.adobe.pdf", 2048)
        .unwrap();

    let out = bridge(&path)
        .args(["--json", "notes", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let notes: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let id = notes[0]["id"].as_str().unwrap();

    bridge(&path)
        .args(["notes", "attachments", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("scan.pdf"))
        .stdout(predicate::str::contains("com.adobe.pdf"));
}

#[test]
fn missing_store_is_a_clear_error() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("notes-bridge");
    cmd.arg("--store")
        .arg("/nonexistent/NoteStore.sqlite")
        .args(["notes", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unavailable"));
}
