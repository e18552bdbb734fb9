//! Assembles a full note document: decoded body, resolved tables, stripped
//! leading title, inline hashtags and links. Also renders to HTML for
//! external consumers.

use crate::crdt;
use crate::error::Result;
use crate::model::{
    NoteDocument, OBJECT_PLACEHOLDER, StyleTag, StyledDocument, Table,
};
use crate::blob;
use crate::store::NotesStore;
use crate::text::leading_title_len;

/// Fetch a note by UUID and assemble its styled document.
pub fn fetch(store: &NotesStore, uuid: &str) -> Result<NoteDocument> {
    let (pk, summary) = store.note_row_by_uuid(uuid)?;
    let data = store.note_blob(pk)?;
    let mut body = blob::decode(&data)?;

    let mut refs = body.table_refs.clone();
    refs.sort_by_key(|r| r.position);
    for table_ref in refs {
        if let Some(raw) = store.table_blob(&table_ref.uuid)?
            && let Some(table) = crdt::parse_table(&raw, table_ref.position)
        {
            body.tables.push(table);
        }
    }

    strip_leading_title(&mut body, &summary.title);

    let hashtags = store.hashtags(pk)?;
    let links = store.note_links(pk)?;
    Ok(NoteDocument {
        summary,
        body,
        hashtags,
        links,
    })
}

/// Drop a first line that duplicates the note title (plus trailing blank
/// lines), shifting runs and table positions in code-point space.
pub fn strip_leading_title(doc: &mut StyledDocument, title: &str) {
    let drop = leading_title_len(&doc.text, title);
    if drop == 0 {
        return;
    }

    let byte = doc
        .text
        .char_indices()
        .nth(drop)
        .map_or(doc.text.len(), |(i, _)| i);
    doc.text = doc.text[byte..].to_string();

    let mut remaining = drop;
    doc.runs.retain_mut(|run| {
        if remaining == 0 {
            return true;
        }
        if run.length <= remaining {
            remaining -= run.length;
            false
        } else {
            run.length -= remaining;
            remaining = 0;
            true
        }
    });

    for r in &mut doc.table_refs {
        r.position = r.position.saturating_sub(drop);
    }
    for t in &mut doc.tables {
        t.position = t.position.saturating_sub(drop);
    }
}

/// Render a styled document to HTML. Paragraph tags follow the run styles;
/// consecutive monospaced lines group into a single code block and bullet or
/// numbered lines into one list. Each U+FFFC placeholder splices the next
/// resolved table in position order.
pub fn to_html(doc: &StyledDocument) -> String {
    #[derive(PartialEq)]
    enum Group {
        None,
        Pre,
        Bullets,
        Numbers,
    }

    let spans = run_spans(doc);
    let mut out = String::new();
    let mut group = Group::None;
    let mut table_idx = 0usize;
    let mut cp = 0usize;

    let close_group = |out: &mut String, group: &mut Group| {
        match group {
            Group::Pre => out.push_str("</pre>\n"),
            Group::Bullets => out.push_str("</ul>\n"),
            Group::Numbers => out.push_str("</ol>\n"),
            Group::None => {}
        }
        *group = Group::None;
    };

    for line in doc.text.split('\n') {
        let line_len = line.chars().count();
        let style = style_at(&spans, cp);
        cp += line_len + 1;

        if line.contains(OBJECT_PLACEHOLDER) {
            close_group(&mut out, &mut group);
            for segment in line.split(OBJECT_PLACEHOLDER) {
                if !segment.trim().is_empty() {
                    out.push_str("<p>");
                    out.push_str(&escape_html(segment));
                    out.push_str("</p>\n");
                }
            }
            for _ in 0..line.matches(OBJECT_PLACEHOLDER).count() {
                if let Some(table) = doc.tables.get(table_idx) {
                    out.push_str(&table_html(table));
                }
                table_idx += 1;
            }
            continue;
        }

        if line.is_empty() {
            close_group(&mut out, &mut group);
            continue;
        }

        let escaped = escape_html(line);
        match style {
            StyleTag::Monospaced => {
                if group != Group::Pre {
                    close_group(&mut out, &mut group);
                    out.push_str("<pre>");
                    group = Group::Pre;
                } else {
                    out.push('\n');
                }
                out.push_str(&escaped);
            }
            StyleTag::BulletList => {
                if group != Group::Bullets {
                    close_group(&mut out, &mut group);
                    out.push_str("<ul>\n");
                    group = Group::Bullets;
                }
                out.push_str("<li>");
                out.push_str(&escaped);
                out.push_str("</li>\n");
            }
            StyleTag::NumberedList => {
                if group != Group::Numbers {
                    close_group(&mut out, &mut group);
                    out.push_str("<ol>\n");
                    group = Group::Numbers;
                }
                out.push_str("<li>");
                out.push_str(&escaped);
                out.push_str("</li>\n");
            }
            other => {
                close_group(&mut out, &mut group);
                let (open, close) = match other {
                    StyleTag::Title => ("<h1>", "</h1>"),
                    StyleTag::Heading => ("<h2>", "</h2>"),
                    StyleTag::Subheading => ("<h3>", "</h3>"),
                    StyleTag::Subheading2 => ("<h4>", "</h4>"),
                    StyleTag::Checkbox => ("<p>\u{2610} ", "</p>"),
                    StyleTag::CheckboxChecked => ("<p>\u{2611} ", "</p>"),
                    _ => ("<p>", "</p>"),
                };
                out.push_str(open);
                out.push_str(&escaped);
                out.push_str(close);
                out.push('\n');
            }
        }
    }
    close_group(&mut out, &mut group);
    out
}

/// (start, end, style) in code-point space, in document order.
fn run_spans(doc: &StyledDocument) -> Vec<(usize, usize, StyleTag)> {
    let mut spans = Vec::with_capacity(doc.runs.len());
    let mut cp = 0usize;
    for run in &doc.runs {
        spans.push((cp, cp + run.length, run.style));
        cp += run.length;
    }
    spans
}

/// Style covering an offset; uncovered tail renders as Body.
fn style_at(spans: &[(usize, usize, StyleTag)], offset: usize) -> StyleTag {
    spans
        .iter()
        .find(|(start, end, _)| offset >= *start && offset < *end)
        .map_or(StyleTag::Body, |(_, _, style)| *style)
}

fn table_html(table: &Table) -> String {
    let mut out = String::from("<table>\n");
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str("<td>");
            out.push_str(&escape_html(cell));
            out.push_str("</td>");
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\"', "&quot;")
        .replace('\'', "&#39;")
}
