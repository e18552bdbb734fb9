use crate::cancel::CancelToken;
use crate::document;
use crate::fts::FtsIndex;
use crate::model::{FolderInfo, SearchResult, SearchSource};
use crate::progress::Progress;
use crate::search::{self, SearchOptions};
use crate::semantic::SemanticIndex;
use crate::store::{ListOptions, NotesStore};
use crate::tables;
use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use comfy_table::Cell;
use std::io::{self, Read};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Parser)]
#[command(
    name = "notes-bridge",
    about = "A local, read-mostly bridge over Apple Notes' on-disk store.",
    version,
    arg_required_else_help = true,
    after_help = r#"Examples:
  notes-bridge notes list --folder "Work" -n 20
  notes-bridge notes show 8C0B58A4-...-UUID
  notes-bridge search "kubectl AND tricks" --content
  notes-bridge search "kubctl" --fuzzy
  notes-bridge index fts
"#
)]
pub struct Args {
    /// Path to NoteStore.sqlite (default: the system store, or $NOTES_BRIDGE_STORE).
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Directory for the derived index files (default: the user cache dir).
    #[arg(long, global = true, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Output JSON for machine consumption.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Notes {
        #[command(subcommand)]
        cmd: NotesCmd,
    },
    Folders {
        #[command(subcommand)]
        cmd: FoldersCmd,
    },
    /// Search across the basic, full-text and semantic subsystems.
    Search {
        query: String,
        /// Decode note blobs and scan their text too.
        #[arg(long)]
        content: bool,
        /// Tolerate typos in title/folder matching.
        #[arg(long)]
        fuzzy: bool,
        /// Include the full-text index (built on demand).
        #[arg(long)]
        fts: bool,
        /// Include the semantic index (model assets fetched on demand).
        #[arg(long)]
        semantic: bool,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, short = 'n', default_value_t = 25)]
        limit: usize,
        /// RFC-3339 bounds on the modification/creation dates.
        #[arg(long, value_name = "TIME")]
        modified_after: Option<String>,
        #[arg(long, value_name = "TIME")]
        modified_before: Option<String>,
        #[arg(long, value_name = "TIME")]
        created_after: Option<String>,
        #[arg(long, value_name = "TIME")]
        created_before: Option<String>,
    },
    /// Build or rebuild the derived indexes.
    Index {
        #[command(subcommand)]
        cmd: IndexCmd,
    },
}

#[derive(Debug, Subcommand)]
pub enum NotesCmd {
    List {
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, short = 'n')]
        limit: Option<usize>,
        /// Include tombstoned notes and "Recently Deleted".
        #[arg(long)]
        include_deleted: bool,
    },
    Show {
        /// Note UUID (from `notes list`).
        id: String,
        /// Render the styled body as HTML.
        #[arg(long)]
        html: bool,
    },
    Create {
        #[arg(long)]
        folder: String,
        #[arg(long)]
        title: String,
        #[arg(long, conflicts_with = "stdin")]
        body: Option<String>,
        /// Read the body from stdin.
        #[arg(long, conflicts_with = "body")]
        stdin: bool,
    },
    /// List a note's attachments (metadata only).
    Attachments {
        /// Note UUID (from `notes list`).
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum FoldersCmd {
    List,
}

#[derive(Debug, Subcommand)]
pub enum IndexCmd {
    /// Rebuild the full-text index.
    Fts,
    /// Rebuild the semantic index (downloads model assets on first run).
    Semantic,
}

pub fn dispatch(args: Args) -> anyhow::Result<()> {
    let store = open_store(args.store)?;
    let json = args.json;
    let cancel = CancelToken::new();

    match args.cmd {
        Command::Notes { cmd } => match cmd {
            NotesCmd::List {
                folder,
                limit,
                include_deleted,
            } => {
                let notes = store.list_notes(&ListOptions {
                    folder,
                    limit,
                    include_deleted,
                })?;
                if json {
                    print_json(&notes)
                } else {
                    print_notes_table(notes)
                }
            }
            NotesCmd::Show { id, html } => {
                let progress = Progress::start("Loading note…");
                let doc = document::fetch(&store, &id)?;
                progress.finish();
                if json {
                    print_json(&doc)
                } else if html {
                    println!("{}", document::to_html(&doc.body));
                    Ok(())
                } else {
                    println!("# {}\n", doc.summary.title);
                    println!("{}", doc.body.text);
                    if !doc.hashtags.is_empty() {
                        let tags: Vec<&str> =
                            doc.hashtags.iter().map(|t| t.text.as_str()).collect();
                        println!("\nTags: {}", tags.join(" "));
                    }
                    for link in &doc.links {
                        println!(
                            "Link: {} -> {}",
                            link.text,
                            link.target.as_deref().unwrap_or("?")
                        );
                    }
                    Ok(())
                }
            }
            NotesCmd::Create {
                folder,
                title,
                body,
                stdin,
            } => {
                let body = read_body(body, stdin)?;
                let created = store.create_note(&folder, &title, &body)?;
                if json {
                    print_json(&created)
                } else {
                    println!("{}", created.id);
                    Ok(())
                }
            }
            NotesCmd::Attachments { id } => {
                let (pk, _) = store.note_row_by_uuid(&id)?;
                let attachments = store.list_attachments(pk)?;
                if json {
                    print_json(&attachments)
                } else {
                    print_attachments_table(attachments)
                }
            }
        },
        Command::Folders { cmd } => match cmd {
            FoldersCmd::List => {
                let folders = store.list_folders()?;
                if json {
                    print_json(&folders)
                } else {
                    print_folders_table(folders)
                }
            }
        },
        Command::Search {
            query,
            content,
            fuzzy,
            fts,
            semantic,
            folder,
            limit,
            modified_after,
            modified_before,
            created_after,
            created_before,
        } => {
            let opts = SearchOptions {
                limit,
                search_content: content,
                fuzzy,
                folder,
                modified_after: parse_time(modified_after.as_deref())?,
                modified_before: parse_time(modified_before.as_deref())?,
                created_after: parse_time(created_after.as_deref())?,
                created_before: parse_time(created_before.as_deref())?,
            };

            let fts_index = if fts {
                Some(open_fts(args.cache_dir.as_deref())?)
            } else {
                None
            };
            let semantic_index = if semantic {
                Some(open_semantic(args.cache_dir.as_deref())?)
            } else {
                None
            };

            let progress = Progress::start("Searching…");
            let results = search::search_all(
                &store,
                fts_index.as_ref(),
                semantic_index.as_ref(),
                &query,
                &opts,
                &cancel,
            )?;
            progress.finish();

            if json {
                print_json(&results)
            } else {
                print_results_table(results)
            }
        }
        Command::Index { cmd } => match cmd {
            IndexCmd::Fts => {
                let progress = Progress::start("Indexing notes…");
                let index = open_fts(args.cache_dir.as_deref())?;
                let report = |done: usize, total: usize| progress.count(done, total);
                let count = index.build(&store, Some(&report), &cancel)?;
                progress.finish();
                eprintln!("indexed {count} notes into {}", index.path().display());
                Ok(())
            }
            IndexCmd::Semantic => {
                let progress = Progress::start("Embedding notes…");
                let index = open_semantic(args.cache_dir.as_deref())?;
                let report = |done: usize, total: usize| progress.count(done, total);
                let count = index.build(&store, Some(&report), &cancel)?;
                progress.finish();
                eprintln!("embedded {count} notes into {}", index.path().display());
                Ok(())
            }
        },
    }
}

fn open_store(flag: Option<PathBuf>) -> anyhow::Result<NotesStore> {
    let path = flag.or_else(|| std::env::var_os("NOTES_BRIDGE_STORE").map(Into::into));
    let store = match path {
        Some(path) => NotesStore::open(path)?,
        None => NotesStore::open_default()?,
    };
    Ok(store)
}

fn open_fts(cache_dir: Option<&std::path::Path>) -> anyhow::Result<FtsIndex> {
    Ok(match cache_dir {
        Some(dir) => FtsIndex::open(dir.join("fts.sqlite"))?,
        None => FtsIndex::open_default()?,
    })
}

fn open_semantic(cache_dir: Option<&std::path::Path>) -> anyhow::Result<SemanticIndex> {
    use crate::semantic::OnnxEmbedder;
    Ok(match cache_dir {
        Some(dir) => SemanticIndex::open(
            dir.join("semantic.json"),
            Box::new(OnnxEmbedder::load()?),
        ),
        None => SemanticIndex::open_default()?,
    })
}

fn read_body(body: Option<String>, stdin: bool) -> anyhow::Result<String> {
    if let Some(body) = body {
        return Ok(body);
    }
    if stdin {
        let mut s = String::new();
        io::stdin().read_to_string(&mut s).context("read stdin")?;
        return Ok(s);
    }
    Ok(String::new())
}

fn parse_time(value: Option<&str>) -> anyhow::Result<Option<OffsetDateTime>> {
    match value {
        None => Ok(None),
        Some(s) => OffsetDateTime::parse(s, &Rfc3339)
            .map(Some)
            .map_err(|e| anyhow!("invalid RFC-3339 time {s:?}: {e}")),
    }
}

fn print_notes_table(notes: Vec<crate::model::NoteSummary>) -> anyhow::Result<()> {
    let mut listing = tables::Listing::new(&["Id", "Modified", "Folder", "Title"]);
    for n in notes {
        let modified = n
            .modified_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "?".to_string());
        listing.row(vec![
            Cell::new(tables::short_id(&n.id)),
            Cell::new(modified),
            Cell::new(n.folder.as_deref().unwrap_or("?")),
            Cell::new(n.title),
        ]);
    }
    listing.print();
    Ok(())
}

fn print_folders_table(folders: Vec<FolderInfo>) -> anyhow::Result<()> {
    let mut listing = tables::Listing::new(&["Account", "Folder", "Notes"]);
    for f in folders {
        listing.row(vec![
            Cell::new(f.account),
            Cell::new(f.name),
            Cell::new(f.note_count),
        ]);
    }
    listing.print();
    Ok(())
}

fn print_attachments_table(attachments: Vec<crate::model::Attachment>) -> anyhow::Result<()> {
    let mut listing = tables::Listing::new(&["Id", "Name", "Type", "Size"]);
    for a in attachments {
        listing.row(vec![
            Cell::new(tables::short_id(&a.id)),
            Cell::new(a.name.as_deref().unwrap_or("?")),
            Cell::new(a.type_uti.as_deref().unwrap_or("")),
            Cell::new(a.file_size.map_or_else(|| "?".to_string(), |s| s.to_string())),
        ]);
    }
    listing.print();
    Ok(())
}

fn print_results_table(results: Vec<SearchResult>) -> anyhow::Result<()> {
    let mut listing = tables::Listing::new(&["Source", "Id", "Title", "Snippet"]);
    for r in results {
        let source = match r.source {
            SearchSource::Basic => "basic",
            SearchSource::Fts => "fts",
            SearchSource::Semantic => "semantic",
            SearchSource::Multi => "multi",
        };
        listing.row(vec![
            Cell::new(source),
            Cell::new(tables::short_id(&r.note.id)),
            Cell::new(r.note.title),
            Cell::new(r.snippet.unwrap_or_default()),
        ]);
    }
    listing.print();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
