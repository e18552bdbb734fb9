use thiserror::Error;

/// What kind of object a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Note,
    Folder,
    Attachment,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundKind::Note => write!(f, "note"),
            NotFoundKind::Folder => write!(f, "folder"),
            NotFoundKind::Attachment => write!(f, "attachment"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The source store could not be opened (missing file, no permission).
    #[error("notes store unavailable: {0}")]
    StoreUnavailable(String),

    /// A SQL prepare/step/finalise failure against the source store or an index file.
    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: NotFoundKind, id: String },

    /// Blob decoding failed; the stage names the layer that rejected the input.
    #[error("decode failed: {0}")]
    DecodeFailed(&'static str),

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// The semantic index could not load its model assets.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn not_found(kind: NotFoundKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::QueryFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
