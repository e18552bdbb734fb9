use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Uniform type identifiers the store uses to classify embedded objects.
pub const TABLE_UTI: &str = "com.apple.notes.table";
pub const HASHTAG_UTI: &str = "com.apple.notes.inlinetextattachment.hashtag";
pub const LINK_UTI: &str = "com.apple.notes.inlinetextattachment.link";

/// Placeholder Apple Notes leaves in the text at each inline-object site.
pub const OBJECT_PLACEHOLDER: char = '\u{FFFC}';

/// Immutable snapshot of a note row at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub folder: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Paragraph style of an attribute run.
///
/// On the wire, Body is the *absence* of the `style_type` field; the numeric
/// values below are the field's payload for every other tag. Writing a zero
/// byte for Body turns the paragraph into a Title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StyleTag {
    #[default]
    Body,
    Title,
    Heading,
    Subheading,
    Subheading2,
    Monospaced,
    BulletList,
    NumberedList,
    Checkbox,
    CheckboxChecked,
}

impl StyleTag {
    /// Maps the on-wire `style_type` payload. `None` means the field was absent.
    pub fn from_wire(value: Option<u64>) -> StyleTag {
        match value {
            None => StyleTag::Body,
            Some(0) => StyleTag::Title,
            Some(1) => StyleTag::Heading,
            Some(2) => StyleTag::Subheading,
            Some(3) => StyleTag::Subheading2,
            Some(4) => StyleTag::Monospaced,
            Some(100) => StyleTag::BulletList,
            Some(101) => StyleTag::NumberedList,
            Some(102) => StyleTag::Checkbox,
            Some(103) => StyleTag::CheckboxChecked,
            // Unrecognised values render as plain paragraphs.
            Some(_) => StyleTag::Body,
        }
    }

    /// The `style_type` payload to write, or `None` to omit the field entirely.
    pub fn to_wire(self) -> Option<u64> {
        match self {
            StyleTag::Body => None,
            StyleTag::Title => Some(0),
            StyleTag::Heading => Some(1),
            StyleTag::Subheading => Some(2),
            StyleTag::Subheading2 => Some(3),
            StyleTag::Monospaced => Some(4),
            StyleTag::BulletList => Some(100),
            StyleTag::NumberedList => Some(101),
            StyleTag::Checkbox => Some(102),
            StyleTag::CheckboxChecked => Some(103),
        }
    }
}

/// A contiguous span of styled text. `length` counts code points, not bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRun {
    pub length: usize,
    pub style: StyleTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
}

impl AttributeRun {
    pub fn plain(length: usize, style: StyleTag) -> Self {
        AttributeRun {
            length,
            style,
            font_weight: None,
            font_size: None,
            font_name: None,
        }
    }

    pub fn is_bold(&self) -> bool {
        self.font_weight == Some(1)
    }
}

/// Pointer from a U+FFFC placeholder to a CRDT-encoded table blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub uuid: String,
    pub type_uti: String,
    /// Code-point offset of the placeholder in the outer text.
    pub position: usize,
}

/// Row-major matrix of cell texts, spliced at `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
    pub position: usize,
}

/// Decoded note body: text plus ordered attribute runs plus inline tables.
///
/// Invariant (well-formed notes): the run lengths sum to the code-point count
/// of `text`. Decoders may return a short tail; renderers treat uncovered
/// suffix as Body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyledDocument {
    pub text: String,
    pub runs: Vec<AttributeRun>,
    /// Resolved tables in placeholder order.
    pub tables: Vec<Table>,
    /// References not yet resolved against the store.
    pub table_refs: Vec<TableRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashtag {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLink {
    pub text: String,
    /// Target note UUID extracted from an `applenotes:note/<UUID>` URL.
    pub target: Option<String>,
}

/// A fully assembled note: metadata, styled body, tags and links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDocument {
    pub summary: NoteSummary,
    pub body: StyledDocument,
    pub hashtags: Vec<Hashtag>,
    pub links: Vec<NoteLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// `x-coredata://<store-uuid>/ICAttachment/p<pk>`
    pub id: String,
    pub identifier: String,
    pub name: Option<String>,
    pub type_uti: Option<String>,
    pub file_size: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
}

/// Folder metadata in the canonical listing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub name: String,
    pub account: String,
    pub note_count: i64,
}

/// Which search subsystem produced a result. `Multi` marks a note returned
/// by two or more subsystems after merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Basic,
    Fts,
    Semantic,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub note: NoteSummary,
    pub source: SearchSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}
