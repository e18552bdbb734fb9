//! On-disk semantic index: one L2-normalised 384-dim embedding per note,
//! cosine-ranked search with a score threshold. The embedding model is a
//! pre-trained sentence transformer run through ONNX Runtime; inference is
//! serialised on a single session.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::store::{NotesStore, to_core_data};
use ndarray::Array2;
use once_cell::sync::OnceCell;
use ort::session::Session;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::OffsetDateTime;
use tracing::debug;

pub const EMBEDDING_DIM: usize = 384;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;

const MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
const MODEL_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// 512 positions, two of which the tokenizer spends on [CLS]/[SEP].
const MAX_TOKENS: usize = 512;

const BATCH_SIZE: usize = 16;

/// Anything that can turn texts into fixed-dimension vectors. The index is
/// written against this seam so tests can run without model assets.
pub trait Embedder {
    fn dim(&self) -> usize;
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    note_id: String,
    title: String,
    folder: Option<String>,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexFile {
    dim: usize,
    built_at: f64,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub note_id: String,
    pub title: String,
    pub folder: Option<String>,
    pub score: f32,
}

pub struct SemanticIndex {
    path: PathBuf,
    embedder: Box<dyn Embedder>,
    cache: RefCell<Option<IndexFile>>,
}

impl SemanticIndex {
    pub fn open(path: impl Into<PathBuf>, embedder: Box<dyn Embedder>) -> Self {
        SemanticIndex {
            path: path.into(),
            embedder,
            cache: RefCell::new(None),
        }
    }

    /// The index file under the user cache directory, backed by the ONNX
    /// embedder (model assets fetched on first load).
    pub fn open_default() -> Result<Self> {
        let cache = dirs::cache_dir()
            .ok_or_else(|| Error::StoreUnavailable("no cache directory".into()))?;
        Ok(Self::open(
            cache.join("notes-bridge").join("semantic.json"),
            Box::new(OnnxEmbedder::load()?),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_built(&self) -> bool {
        self.load().map_or(false, |file| !file.entries.is_empty())
    }

    pub fn entry_count(&self) -> usize {
        self.load().map_or(0, |file| file.entries.len())
    }

    /// Embed every note's title (and folder) and persist the vectors.
    /// Rebuilds are explicit: the index does not auto-invalidate when the
    /// store changes.
    pub fn build(
        &self,
        store: &NotesStore,
        progress: Option<&dyn Fn(usize, usize)>,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let rows = store.list_note_rows(&Default::default())?;
        let total = rows.len();
        let mut entries = Vec::with_capacity(total);

        for batch in rows.chunks(BATCH_SIZE) {
            cancel.check()?;
            let texts: Vec<String> = batch
                .iter()
                .map(|(_, note)| embedding_text(&note.title, note.folder.as_deref()))
                .collect();
            let vectors = self.embedder.embed(&texts)?;
            for ((_, note), vector) in batch.iter().zip(vectors) {
                entries.push(Entry {
                    note_id: note.id.clone(),
                    title: note.title.clone(),
                    folder: note.folder.clone(),
                    vector,
                });
            }
            if let Some(progress) = progress {
                progress(entries.len(), total);
            }
        }

        let file = IndexFile {
            dim: self.embedder.dim(),
            built_at: to_core_data(OffsetDateTime::now_utc()),
            entries,
        };
        self.persist(&file)?;
        debug!(count = total, path = %self.path.display(), "semantic index built");
        let count = file.entries.len();
        *self.cache.borrow_mut() = Some(file);
        Ok(count)
    }

    /// Drop the on-disk index; the next search rebuilds from scratch.
    pub fn invalidate(&self) -> Result<()> {
        *self.cache.borrow_mut() = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", self.path.display())))?;
        }
        Ok(())
    }

    /// Cosine-ranked lookup. Builds transparently on first use when no
    /// index exists yet.
    pub fn search(
        &self,
        store: &NotesStore,
        query: &str,
        limit: usize,
        threshold: Option<f32>,
        cancel: &CancelToken,
    ) -> Result<Vec<SemanticHit>> {
        cancel.check()?;
        if !self.is_built() {
            self.build(store, None, cancel)?;
        }
        let threshold = threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD);

        let query_vec = self
            .embedder
            .embed(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or(Error::MissingParameter("query"))?;

        let cache = self.cache.borrow();
        let file = cache.as_ref().expect("index loaded or built above");
        let mut hits = Vec::new();
        for (i, entry) in file.entries.iter().enumerate() {
            if i % 256 == 0 {
                cancel.check()?;
            }
            let score = cosine_similarity(&query_vec, &entry.vector);
            if score >= threshold {
                hits.push(SemanticHit {
                    note_id: entry.note_id.clone(),
                    title: entry.title.clone(),
                    folder: entry.folder.clone(),
                    score,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn load(&self) -> Option<std::cell::Ref<'_, IndexFile>> {
        if self.cache.borrow().is_none() {
            let parsed: Option<IndexFile> = std::fs::read(&self.path)
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok());
            if let Some(file) = parsed {
                *self.cache.borrow_mut() = Some(file);
            }
        }
        let cache = self.cache.borrow();
        if cache.is_some() {
            Some(std::cell::Ref::map(cache, |c| {
                c.as_ref().expect("checked above")
            }))
        } else {
            None
        }
    }

    fn persist(&self, file: &IndexFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_vec(file)
            .map_err(|e| Error::QueryFailed(format!("serialize semantic index: {e}")))?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

fn embedding_text(title: &str, folder: Option<&str>) -> String {
    match folder {
        Some(folder) => format!("{title}\n{folder}"),
        None => title.to_string(),
    }
}

/// Full cosine with norm computation; stored vectors are normalised but the
/// trait does not require it.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    let score = dot / denom;
    if score.is_finite() { score } else { 0.0 }
}

/// Sentence-transformer embedder over ONNX Runtime. Model and tokenizer are
/// fetched from the HuggingFace hub on first load; the session itself is
/// created lazily because it costs a few hundred milliseconds.
pub struct OnnxEmbedder {
    session: OnceCell<Mutex<Session>>,
    tokenizer: OnceCell<tokenizers::Tokenizer>,
    model_path: PathBuf,
    tokenizer_path: PathBuf,
}

impl OnnxEmbedder {
    pub fn load() -> Result<Self> {
        let (model_path, tokenizer_path) = fetch_model_assets()?;
        Ok(OnnxEmbedder {
            session: OnceCell::new(),
            tokenizer: OnceCell::new(),
            model_path,
            tokenizer_path,
        })
    }

    fn session(&self) -> Result<std::sync::MutexGuard<'_, Session>> {
        let session = self.session.get_or_try_init(|| {
            Session::builder()
                .and_then(|mut builder| builder.commit_from_file(&self.model_path))
                .map(Mutex::new)
                .map_err(|e| Error::ModelUnavailable(e.to_string()))
        })?;
        Ok(session.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn tokenizer(&self) -> Result<&tokenizers::Tokenizer> {
        self.tokenizer.get_or_try_init(|| {
            let mut tokenizer = tokenizers::Tokenizer::from_file(&self.tokenizer_path)
                .map_err(|e| Error::ModelUnavailable(e.to_string()))?;
            tokenizer
                .with_truncation(Some(tokenizers::TruncationParams {
                    max_length: MAX_TOKENS,
                    ..Default::default()
                }))
                .map_err(|e| Error::ModelUnavailable(e.to_string()))?;
            tokenizer.with_padding(Some(tokenizers::PaddingParams {
                strategy: tokenizers::PaddingStrategy::Fixed(MAX_TOKENS),
                ..Default::default()
            }));
            Ok(tokenizer)
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        use ort::value::Tensor;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer()?
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

        let input_ids: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_ids().iter().map(|&id| id as i64).collect())
            .collect();
        let attention_mask: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_attention_mask().iter().map(|&m| m as i64).collect())
            .collect();

        let input_ids_arr = pad_2d_i64(&input_ids, MAX_TOKENS);
        let attention_mask_arr = pad_2d_i64(&attention_mask, MAX_TOKENS);
        let token_type_ids_arr = Array2::<i64>::zeros((texts.len(), MAX_TOKENS));

        let inference = Error::ModelUnavailable;
        let mut session = self.session()?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => Tensor::from_array(input_ids_arr).map_err(|e| inference(e.to_string()))?,
                "attention_mask" => Tensor::from_array(attention_mask_arr).map_err(|e| inference(e.to_string()))?,
                "token_type_ids" => Tensor::from_array(token_type_ids_arr).map_err(|e| inference(e.to_string()))?,
            ])
            .map_err(|e| inference(e.to_string()))?;

        // [batch, seq, dim]; mean-pool over the attention mask then
        // L2-normalise, which is this model's pooled sentence output.
        let (_shape, data) = outputs["last_hidden_state"]
            .try_extract_tensor::<f32>()
            .map_err(|e| inference(e.to_string()))?;

        let mut results = Vec::with_capacity(texts.len());
        for (i, mask) in attention_mask.iter().enumerate() {
            let mut sum = vec![0.0f32; EMBEDDING_DIM];
            let mut count = 0.0f32;
            for (j, &m) in mask.iter().enumerate().take(MAX_TOKENS) {
                if m > 0 {
                    count += 1.0;
                    let offset = (i * MAX_TOKENS + j) * EMBEDDING_DIM;
                    for (k, slot) in sum.iter_mut().enumerate() {
                        *slot += data[offset + k];
                    }
                }
            }
            if count > 0.0 {
                for slot in &mut sum {
                    *slot /= count;
                }
            }
            results.push(normalize_l2(sum));
        }
        Ok(results)
    }
}

fn fetch_model_assets() -> Result<(PathBuf, PathBuf)> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| Error::ModelUnavailable(e.to_string()))?;
    let repo = api.model(MODEL_REPO.to_string());
    let model_path = repo
        .get(MODEL_FILE)
        .map_err(|e| Error::ModelUnavailable(e.to_string()))?;
    let tokenizer_path = repo
        .get(TOKENIZER_FILE)
        .map_err(|e| Error::ModelUnavailable(e.to_string()))?;
    Ok((model_path, tokenizer_path))
}

fn pad_2d_i64(inputs: &[Vec<i64>], max_len: usize) -> Array2<i64> {
    let mut arr = Array2::from_elem((inputs.len(), max_len), 0i64);
    for (i, seq) in inputs.iter().enumerate() {
        for (j, &val) in seq.iter().take(max_len).enumerate() {
            arr[[i, j]] = val;
        }
    }
    arr
}

fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq > 0.0 {
        let inv = 1.0 / norm_sq.sqrt();
        for x in &mut v {
            *x *= inv;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureStore;
    use tempfile::tempdir;

    /// Deterministic word-bucket embedder; shared words → high cosine.
    struct StubEmbedder {
        dim: usize,
    }

    impl Embedder for StubEmbedder {
        fn dim(&self) -> usize {
            self.dim
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut v = vec![0.0f32; self.dim];
                    for word in text.to_lowercase().split_whitespace() {
                        let bucket = word
                            .bytes()
                            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
                            % self.dim;
                        v[bucket] += 1.0;
                    }
                    normalize_l2(v)
                })
                .collect())
        }
    }

    fn stub_index(path: &Path) -> SemanticIndex {
        SemanticIndex::open(path, Box::new(StubEmbedder { dim: 32 }))
    }

    fn seeded() -> (tempfile::TempDir, FixtureStore) {
        let dir = tempdir().unwrap();
        let fixture = FixtureStore::create(dir.path().join("NoteStore.sqlite")).unwrap();
        let folder = fixture.add_folder("Notes", 1.0).unwrap();
        fixture
            .add_note(folder, "kubernetes deployment", "", 1.0, 100.0)
            .unwrap();
        fixture
            .add_note(folder, "grocery list", "", 1.0, 200.0)
            .unwrap();
        (dir, fixture)
    }

    #[test]
    fn cosine_similarity_behaves() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0); // length mismatch
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn build_then_search_ranks_by_score() {
        let (dir, fixture) = seeded();
        let store = fixture.store().unwrap();
        let index = stub_index(&dir.path().join("semantic.json"));
        let cancel = CancelToken::new();

        let count = index.build(&store, None, &cancel).unwrap();
        assert_eq!(count, 2);

        let hits = index
            .search(&store, "kubernetes deployment Notes", 10, Some(0.5), &cancel)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].title, "kubernetes deployment");
        assert!(hits[0].score > 0.9);
        // Sorted descending.
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn threshold_filters_unrelated_notes() {
        let (dir, fixture) = seeded();
        let store = fixture.store().unwrap();
        let index = stub_index(&dir.path().join("semantic.json"));
        let cancel = CancelToken::new();
        index.build(&store, None, &cancel).unwrap();

        let hits = index
            .search(&store, "zzz qqq vvv", 10, Some(0.99), &cancel)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn first_search_builds_transparently() {
        let (dir, fixture) = seeded();
        let store = fixture.store().unwrap();
        let index = stub_index(&dir.path().join("semantic.json"));
        let cancel = CancelToken::new();

        assert!(!index.is_built());
        let _ = index
            .search(&store, "kubernetes", 10, Some(0.1), &cancel)
            .unwrap();
        assert!(index.is_built());
        assert_eq!(index.entry_count(), 2);
    }

    #[test]
    fn index_persists_across_handles() {
        let (dir, fixture) = seeded();
        let store = fixture.store().unwrap();
        let path = dir.path().join("semantic.json");
        let cancel = CancelToken::new();

        stub_index(&path).build(&store, None, &cancel).unwrap();

        let reopened = stub_index(&path);
        assert!(reopened.is_built());
        assert_eq!(reopened.entry_count(), 2);
    }

    #[test]
    fn invalidate_drops_the_file() {
        let (dir, fixture) = seeded();
        let store = fixture.store().unwrap();
        let path = dir.path().join("semantic.json");
        let index = stub_index(&path);
        index.build(&store, None, &CancelToken::new()).unwrap();
        assert!(path.exists());

        index.invalidate().unwrap();
        assert!(!path.exists());
        assert!(!index.is_built());
    }

    #[test]
    fn cancelled_build_writes_nothing() {
        let (dir, fixture) = seeded();
        let store = fixture.store().unwrap();
        let path = dir.path().join("semantic.json");
        let index = stub_index(&path);

        let cancelled = CancelToken::new();
        cancelled.cancel();
        let err = index.build(&store, None, &cancelled).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!path.exists());
    }

    #[test]
    fn build_reports_progress() {
        let (dir, fixture) = seeded();
        let store = fixture.store().unwrap();
        let index = stub_index(&dir.path().join("semantic.json"));

        let calls = std::sync::Mutex::new(Vec::new());
        let progress = |done: usize, total: usize| calls.lock().unwrap().push((done, total));
        index
            .build(&store, Some(&progress), &CancelToken::new())
            .unwrap();
        assert_eq!(*calls.lock().unwrap().last().unwrap(), (2, 2));
    }
}
