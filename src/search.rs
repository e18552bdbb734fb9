//! Layered search: an indexed SQL scan, an optional decoded-content scan,
//! and an optional fuzzy fallback, plus the merge across the FTS and
//! semantic subsystems.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fts::FtsIndex;
use crate::model::{NoteSummary, SearchResult, SearchSource};
use crate::semantic::SemanticIndex;
use crate::snippet;
use crate::blob;
use crate::store::{ListOptions, NotesStore, to_core_data};
use crate::text::{fuzzy_threshold, levenshtein, split_words};
use rusqlite::types::Value;
use std::collections::HashSet;
use time::OffsetDateTime;

const INDEXED_SNIPPET_WINDOW: usize = 40;
const CONTENT_SNIPPET_WINDOW: usize = 60;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Phase 2: decode note blobs and scan their text.
    pub search_content: bool,
    /// Phase 3: Levenshtein-tolerant matching over title and folder.
    pub fuzzy: bool,
    pub folder: Option<String>,
    pub modified_after: Option<OffsetDateTime>,
    pub modified_before: Option<OffsetDateTime>,
    pub created_after: Option<OffsetDateTime>,
    pub created_before: Option<OffsetDateTime>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            limit: 25,
            search_content: false,
            fuzzy: false,
            folder: None,
            modified_after: None,
            modified_before: None,
            created_after: None,
            created_before: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    And,
    Or,
}

impl Combinator {
    fn matches(self, mut hits: impl Iterator<Item = bool>) -> bool {
        match self {
            Combinator::And => hits.all(|h| h),
            Combinator::Or => hits.any(|h| h),
        }
    }
}

/// `a AND b` (case-insensitive, space-delimited) splits into AND terms;
/// otherwise ` OR ` splits into OR terms; otherwise the query is one term.
pub(crate) fn parse_query(query: &str) -> (Vec<String>, Combinator) {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.iter().any(|t| t.eq_ignore_ascii_case("AND")) {
        let mut terms = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for token in tokens {
            if token.eq_ignore_ascii_case("AND") {
                if !current.is_empty() {
                    terms.push(current.join(" "));
                    current = Vec::new();
                }
            } else {
                current.push(token);
            }
        }
        if !current.is_empty() {
            terms.push(current.join(" "));
        }
        return (terms, Combinator::And);
    }
    if query.contains(" OR ") {
        let terms = query
            .split(" OR ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        return (terms, Combinator::Or);
    }
    let trimmed = query.trim();
    if trimmed.is_empty() {
        (Vec::new(), Combinator::And)
    } else {
        (vec![trimmed.to_string()], Combinator::And)
    }
}

/// The basic (always-on) search path. Results are tagged `basic` and come
/// back phase-ordered: indexed matches, then content matches, then fuzzy.
pub fn basic_search(
    store: &NotesStore,
    query: &str,
    opts: &SearchOptions,
    cancel: &CancelToken,
) -> Result<Vec<SearchResult>> {
    let (terms, combinator) = parse_query(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let mut results = indexed_scan(store, &terms, combinator, opts)?;
    let mut seen: HashSet<String> = results.iter().map(|r| r.note.id.clone()).collect();

    if opts.search_content && results.len() < opts.limit {
        content_scan(store, &terms, combinator, opts, cancel, &mut seen, &mut results)?;
    }
    if opts.fuzzy && results.len() < opts.limit {
        fuzzy_scan(store, &terms, combinator, opts, cancel, &mut seen, &mut results)?;
    }
    Ok(results)
}

/// Phase 1: one parameterised statement over the indexed columns.
/// Bind order: each term three times, then filters in declared order, then
/// the limit.
fn indexed_scan(
    notes: &NotesStore,
    terms: &[String],
    combinator: Combinator,
    opts: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let mut sql = String::from(
        "SELECT n.Z_PK, n.ZIDENTIFIER, n.ZTITLE1, f.ZTITLE2, \
         n.ZCREATIONDATE1, n.ZMODIFICATIONDATE1, n.ZSNIPPET \
         FROM ZICCLOUDSYNCINGOBJECT n \
         LEFT JOIN ZICCLOUDSYNCINGOBJECT f ON f.Z_PK = n.ZFOLDER AND f.Z_ENT = 15 \
         WHERE n.Z_ENT = 12 AND n.ZTITLE1 IS NOT NULL \
         AND IFNULL(n.ZMARKEDFORDELETION, 0) = 0 \
         AND IFNULL(f.ZTITLE2, '') <> 'Recently Deleted' AND (",
    );
    let mut binds: Vec<Value> = Vec::new();

    let term_predicate = "(instr(lower(IFNULL(n.ZTITLE1, '')), ?) > 0 \
         OR instr(lower(IFNULL(n.ZSNIPPET, '')), ?) > 0 \
         OR instr(lower(IFNULL(f.ZTITLE2, '')), ?) > 0)";
    let joiner = match combinator {
        Combinator::And => " AND ",
        Combinator::Or => " OR ",
    };
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            sql.push_str(joiner);
        }
        sql.push_str(term_predicate);
        let folded = term.to_lowercase();
        for _ in 0..3 {
            binds.push(Value::Text(folded.clone()));
        }
    }
    sql.push(')');

    if let Some(folder) = &opts.folder {
        sql.push_str(" AND lower(IFNULL(f.ZTITLE2, '')) = lower(?)");
        binds.push(Value::Text(folder.clone()));
    }
    for (bound, op) in [
        (opts.modified_after, " AND n.ZMODIFICATIONDATE1 >= ?"),
        (opts.modified_before, " AND n.ZMODIFICATIONDATE1 <= ?"),
        (opts.created_after, " AND n.ZCREATIONDATE1 >= ?"),
        (opts.created_before, " AND n.ZCREATIONDATE1 <= ?"),
    ] {
        if let Some(t) = bound {
            sql.push_str(op);
            binds.push(Value::Real(to_core_data(t)));
        }
    }
    sql.push_str(" ORDER BY n.ZMODIFICATIONDATE1 DESC LIMIT ?");
    binds.push(Value::Integer(opts.limit as i64));

    let rows = notes.query_summaries(&sql, &binds)?;
    Ok(rows
        .into_iter()
        .map(|(_, note)| {
            let searchable = format!(
                "{} | {} | {}",
                note.title,
                note.snippet.as_deref().unwrap_or(""),
                note.folder.as_deref().unwrap_or("")
            );
            let snip = snippet::extract(&searchable, terms, INDEXED_SNIPPET_WINDOW);
            SearchResult {
                note,
                source: SearchSource::Basic,
                score: None,
                snippet: snip,
            }
        })
        .collect())
}

/// Phase 2: decode blobs newest-first and match the plain text. Decode
/// failures skip the note; the scan keeps going.
fn content_scan(
    notes: &NotesStore,
    terms: &[String],
    combinator: Combinator,
    opts: &SearchOptions,
    cancel: &CancelToken,
    seen: &mut HashSet<String>,
    results: &mut Vec<SearchResult>,
) -> Result<()> {
    let folded: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
    let rows = notes.list_note_rows(&ListOptions {
        folder: opts.folder.clone(),
        ..Default::default()
    })?;
    for (pk, note) in rows {
        cancel.check()?;
        if results.len() >= opts.limit {
            break;
        }
        if seen.contains(&note.id) || !within_date_bounds(&note, opts) {
            continue;
        }
        let Ok(data) = notes.note_blob(pk) else {
            continue;
        };
        let Ok(doc) = blob::decode(&data) else {
            continue;
        };
        let haystack = doc.text.to_lowercase();
        if combinator.matches(folded.iter().map(|t| haystack.contains(t.as_str()))) {
            seen.insert(note.id.clone());
            let snip = snippet::extract(&doc.text, terms, CONTENT_SNIPPET_WINDOW);
            results.push(SearchResult {
                note,
                source: SearchSource::Basic,
                score: None,
                snippet: snip,
            });
        }
    }
    Ok(())
}

/// Phase 3: typo-tolerant match over `title | folder`.
fn fuzzy_scan(
    notes: &NotesStore,
    terms: &[String],
    combinator: Combinator,
    opts: &SearchOptions,
    cancel: &CancelToken,
    seen: &mut HashSet<String>,
    results: &mut Vec<SearchResult>,
) -> Result<()> {
    let rows = notes.list_note_rows(&ListOptions {
        folder: opts.folder.clone(),
        ..Default::default()
    })?;
    for (_, note) in rows {
        cancel.check()?;
        if results.len() >= opts.limit {
            break;
        }
        if seen.contains(&note.id) || !within_date_bounds(&note, opts) {
            continue;
        }
        let searchable = format!("{} | {}", note.title, note.folder.as_deref().unwrap_or(""));
        if combinator.matches(terms.iter().map(|t| fuzzy_term_matches(&searchable, t))) {
            seen.insert(note.id.clone());
            let snip = snippet::extract(&searchable, terms, INDEXED_SNIPPET_WINDOW);
            results.push(SearchResult {
                note,
                source: SearchSource::Basic,
                score: None,
                snippet: snip,
            });
        }
    }
    Ok(())
}

/// Substring hit, or any word within the term's edit-distance threshold.
fn fuzzy_term_matches(searchable: &str, term: &str) -> bool {
    let haystack = searchable.to_lowercase();
    if haystack.contains(&term.to_lowercase()) {
        return true;
    }
    let threshold = fuzzy_threshold(term);
    split_words(searchable)
        .into_iter()
        .any(|word| levenshtein(word, term) <= threshold)
}

fn within_date_bounds(note: &NoteSummary, opts: &SearchOptions) -> bool {
    if let Some(t) = opts.modified_after
        && note.modified_at < t
    {
        return false;
    }
    if let Some(t) = opts.modified_before
        && note.modified_at > t
    {
        return false;
    }
    if let Some(t) = opts.created_after
        && note.created_at < t
    {
        return false;
    }
    if let Some(t) = opts.created_before
        && note.created_at > t
    {
        return false;
    }
    true
}

/// Composite search over every subsystem that is available: basic always,
/// FTS and semantic when handed in. The merged set is ordered basic → fts →
/// semantic, and notes surfaced by more than one subsystem collapse into a
/// single `multi`-tagged result.
pub fn search_all(
    notes: &NotesStore,
    fts: Option<&FtsIndex>,
    semantic: Option<&SemanticIndex>,
    query: &str,
    opts: &SearchOptions,
    cancel: &CancelToken,
) -> Result<Vec<SearchResult>> {
    let mut merged = basic_search(notes, query, opts, cancel)?;
    let mut index_of: std::collections::HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, r)| (r.note.id.clone(), i))
        .collect();

    let mut absorb = |merged: &mut Vec<SearchResult>, result: SearchResult| {
        if let Some(&i) = index_of.get(&result.note.id) {
            let existing = &mut merged[i];
            existing.source = SearchSource::Multi;
            if existing.score.is_none() {
                existing.score = result.score;
            }
            if existing.snippet.is_none() {
                existing.snippet = result.snippet;
            }
        } else {
            index_of.insert(result.note.id.clone(), merged.len());
            merged.push(result);
        }
    };

    if let Some(fts) = fts {
        let outcome = fts.search(notes, query, opts.limit, cancel)?;
        for hit in outcome.hits {
            let Ok(note) = notes.note_by_uuid(&hit.note_id) else {
                continue; // index lagging behind a deletion
            };
            if !within_date_bounds(&note, opts)
                || !folder_matches(&note, opts.folder.as_deref())
            {
                continue;
            }
            absorb(
                &mut merged,
                SearchResult {
                    note,
                    source: SearchSource::Fts,
                    score: None,
                    snippet: Some(hit.snippet),
                },
            );
        }
    }

    if let Some(semantic) = semantic {
        let hits = semantic.search(notes, query, opts.limit, None, cancel)?;
        for hit in hits {
            let Ok(note) = notes.note_by_uuid(&hit.note_id) else {
                continue;
            };
            if !within_date_bounds(&note, opts)
                || !folder_matches(&note, opts.folder.as_deref())
            {
                continue;
            }
            absorb(
                &mut merged,
                SearchResult {
                    note,
                    source: SearchSource::Semantic,
                    score: Some(hit.score),
                    snippet: None,
                },
            );
        }
    }

    Ok(merged)
}

fn folder_matches(note: &NoteSummary, folder: Option<&str>) -> bool {
    match folder {
        None => true,
        Some(f) => note
            .folder
            .as_deref()
            .is_some_and(|nf| nf.eq_ignore_ascii_case(f)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureStore;
    use tempfile::tempdir;

    fn fixture() -> (tempfile::TempDir, FixtureStore) {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        (dir, fixture)
    }

    #[test]
    fn query_parse_handles_and_or_and_single() {
        assert_eq!(
            parse_query("kubectl AND tricks"),
            (vec!["kubectl".into(), "tricks".into()], Combinator::And)
        );
        assert_eq!(
            parse_query("a and b AND c"),
            (vec!["a".into(), "b".into(), "c".into()], Combinator::And)
        );
        assert_eq!(
            parse_query("cats OR dogs"),
            (vec!["cats".into(), "dogs".into()], Combinator::Or)
        );
        assert_eq!(
            parse_query("plain phrase"),
            (vec!["plain phrase".into()], Combinator::And)
        );
        assert_eq!(parse_query("   ").0, Vec::<String>::new());
        // Multi-word terms survive around AND.
        assert_eq!(
            parse_query("big cat AND small dog"),
            (vec!["big cat".into(), "small dog".into()], Combinator::And)
        );
    }

    #[test]
    fn two_term_and_needs_content_scan_for_body_hits() {
        let (_dir, fixture) = fixture();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        fixture
            .add_note(folder, "kubectl tricks", "everything", 1.0, 300.0)
            .unwrap();
        fixture
            .add_note(folder, "kubectl", "tricks live in the body", 1.0, 200.0)
            .unwrap();

        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();

        let indexed_only = basic_search(
            &store,
            "kubectl AND tricks",
            &SearchOptions::default(),
            &cancel,
        )
        .unwrap();
        // Note B's snippet ("tricks live in the body") also matches the
        // indexed columns, so pin the assertion to the title-only hit first.
        assert_eq!(indexed_only[0].note.title, "kubectl tricks");

        let with_content = basic_search(
            &store,
            "kubectl AND tricks",
            &SearchOptions {
                search_content: true,
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
        let titles: Vec<&str> = with_content.iter().map(|r| r.note.title.as_str()).collect();
        assert_eq!(titles[0], "kubectl tricks");
        assert!(titles.contains(&"kubectl"));
    }

    #[test]
    fn content_scan_finds_body_only_matches() {
        let (_dir, fixture) = fixture();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        fixture
            .add_note(folder, "Recipes", "secret marinade instructions", 1.0, 100.0)
            .unwrap();

        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();
        let without = basic_search(&store, "marinade", &SearchOptions::default(), &cancel).unwrap();
        // The snippet column carries the first body line, so even the indexed
        // phase can see it; body text deeper in the note cannot.
        assert_eq!(without.len(), 1);

        fixture
            .add_note(
                folder,
                "Deep",
                "first line\nthe marinade is hidden here",
                1.0,
                200.0,
            )
            .unwrap();
        let store = fixture.store().unwrap();
        let with = basic_search(
            &store,
            "hidden",
            &SearchOptions {
                search_content: true,
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
        assert_eq!(with.len(), 1);
        assert_eq!(with[0].note.title, "Deep");
        assert!(with[0].snippet.as_deref().unwrap().contains("**hidden**"));
    }

    #[test]
    fn fuzzy_phase_catches_typos() {
        let (_dir, fixture) = fixture();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        fixture
            .add_note(folder, "kubectl reference", "cheat sheet", 1.0, 100.0)
            .unwrap();

        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();

        let strict = basic_search(&store, "kubctl", &SearchOptions::default(), &cancel).unwrap();
        assert!(strict.is_empty());

        let fuzzy = basic_search(
            &store,
            "kubctl",
            &SearchOptions {
                fuzzy: true,
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].note.title, "kubectl reference");
    }

    #[test]
    fn or_semantics_widen_the_match() {
        let (_dir, fixture) = fixture();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        fixture.add_note(folder, "cats", "", 1.0, 100.0).unwrap();
        fixture.add_note(folder, "dogs", "", 1.0, 200.0).unwrap();
        fixture.add_note(folder, "fish", "", 1.0, 300.0).unwrap();

        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();
        let results =
            basic_search(&store, "cats OR dogs", &SearchOptions::default(), &cancel).unwrap();
        let titles: Vec<&str> = results.iter().map(|r| r.note.title.as_str()).collect();
        assert_eq!(titles, ["dogs", "cats"]); // modified desc
    }

    #[test]
    fn date_bounds_restrict_every_phase() {
        let (_dir, fixture) = fixture();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        fixture.add_note(folder, "old pet", "", 1.0, 100.0).unwrap();
        fixture.add_note(folder, "new pet", "", 1.0, 500.0).unwrap();

        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();
        let opts = SearchOptions {
            modified_after: Some(crate::store::from_core_data(300.0)),
            fuzzy: true,
            search_content: true,
            ..Default::default()
        };
        let results = basic_search(&store, "pet", &opts, &cancel).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].note.title, "new pet");
    }

    #[test]
    fn folder_filter_applies_case_insensitively() {
        let (_dir, fixture) = fixture();
        let work = fixture.add_folder("Work", 1.0).unwrap();
        let home = fixture.add_folder("Home", 2.0).unwrap();
        fixture.add_note(work, "plan", "", 1.0, 100.0).unwrap();
        fixture.add_note(home, "plan", "", 1.0, 200.0).unwrap();

        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();
        let results = basic_search(
            &store,
            "plan",
            &SearchOptions {
                folder: Some("work".into()),
                ..Default::default()
            },
            &cancel,
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].note.folder.as_deref(), Some("Work"));
    }

    #[test]
    fn indexed_snippet_highlights_terms() {
        let (_dir, fixture) = fixture();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        fixture
            .add_note(folder, "kubectl tricks", "", 1.0, 100.0)
            .unwrap();

        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();
        let results = basic_search(&store, "kubectl", &SearchOptions::default(), &cancel).unwrap();
        assert!(results[0].snippet.as_deref().unwrap().contains("**kubectl**"));
    }

    #[test]
    fn cancellation_stops_the_scan() {
        let (_dir, fixture) = fixture();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        for i in 0..5 {
            fixture
                .add_note(folder, &format!("note {i}"), "body", 1.0, i as f64)
                .unwrap();
        }
        let store = fixture.store().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = basic_search(
            &store,
            "zzz-no-index-hit",
            &SearchOptions {
                search_content: true,
                ..Default::default()
            },
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::Cancelled));
    }

    #[test]
    fn fuzzy_term_thresholds_follow_length() {
        assert!(fuzzy_term_matches("kubectl reference", "kubctl")); // d=1 ≤ 3
        assert!(fuzzy_term_matches("note", "nose")); // d=1 ≤ 2
        assert!(!fuzzy_term_matches("note", "abcdef")); // too far
    }
}
