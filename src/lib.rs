mod blob;
mod cancel;
mod cli;
mod crdt;
mod document;
mod error;
mod fixture;
mod fts;
mod model;
mod progress;
mod search;
mod semantic;
mod snippet;
mod store;
mod tables;
mod text;
mod wire;

pub use blob::{decode, dump_runs, encode};
pub use cancel::CancelToken;
pub use crdt::parse_table;
pub use document::{fetch as fetch_document, strip_leading_title, to_html};
pub use error::{Error, NotFoundKind, Result};
pub use fixture::FixtureStore;
pub use fts::{FtsHit, FtsIndex, FtsSearch};
pub use model::{
    Attachment, AttributeRun, FolderInfo, Hashtag, NoteDocument, NoteLink, NoteSummary,
    OBJECT_PLACEHOLDER, SearchResult, SearchSource, StyleTag, StyledDocument, Table, TableRef,
};
pub use search::{SearchOptions, basic_search, search_all};
pub use semantic::{Embedder, OnnxEmbedder, SemanticHit, SemanticIndex, cosine_similarity};
pub use store::{ListOptions, NotesStore, from_core_data, to_core_data};

use clap::Parser;

pub fn run() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    cli::dispatch(args)
}
