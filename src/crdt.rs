//! Reconstruction of inline tables from the mergeable-data blob.
//!
//! The blob carries a CRDT op stream whose schema Apple has never published.
//! Cell texts reliably appear as the string in field 2 of each descendant
//! field-10 message, so the parser scans the whole tree for those and then
//! recovers the row shape from the cell count. Good enough for the 2–4
//! column tables people actually make; a full op replay can slot in later
//! once the op schema is understood.

use crate::blob::unwrap_gzip;
use crate::model::{OBJECT_PLACEHOLDER, Table};
use crate::wire::{Cursor, WireType};

/// Bounds against malformed or adversarial blobs.
const MAX_DEPTH: usize = 15;
const MAX_CELLS: usize = 500;

/// Parse a mergeable-data blob into a table spliced at `position`.
/// Malformed or empty input yields `None`, never an error.
pub fn parse_table(data: &[u8], position: usize) -> Option<Table> {
    let payload = unwrap_gzip(data).ok()?;
    let mut cells = Vec::new();
    collect_cells(&payload, 0, &mut cells);
    if cells.is_empty() {
        return None;
    }
    let width = guess_width(cells.len());
    let rows = cells.chunks(width).map(<[String]>::to_vec).collect();
    Some(Table { rows, position })
}

fn collect_cells(buf: &[u8], depth: usize, out: &mut Vec<String>) {
    if depth > MAX_DEPTH || out.len() >= MAX_CELLS {
        return;
    }
    let mut cur = Cursor::new(buf);
    loop {
        let Ok(Some((field, wire))) = cur.read_tag() else {
            return;
        };
        if wire != WireType::LengthDelimited {
            if cur.skip_field(wire).is_err() {
                return;
            }
            continue;
        }
        let Ok(inner) = cur.read_length_delimited() else {
            return;
        };
        if field == 10 {
            if let Some(cell) = extract_cell_text(inner)
                && out.len() < MAX_CELLS
            {
                out.push(cell);
            }
        } else {
            collect_cells(inner, depth + 1, out);
        }
    }
}

/// The string inside field 2 of a field-10 message, cleaned up.
fn extract_cell_text(buf: &[u8]) -> Option<String> {
    let mut cur = Cursor::new(buf);
    loop {
        let (field, wire) = cur.read_tag().ok()??;
        if field == 2 && wire == WireType::LengthDelimited {
            let raw = cur.read_length_delimited().ok()?;
            let s = std::str::from_utf8(raw).ok()?;
            let cleaned: String = s.chars().filter(|&c| c != OBJECT_PLACEHOLDER).collect();
            let cleaned = cleaned.trim();
            return if cleaned.is_empty() {
                None
            } else {
                Some(cleaned.to_string())
            };
        }
        cur.skip_field(wire).ok()?;
    }
}

/// Pick a column width that divides the cell count, preferring narrow
/// tables; counts nothing divides fall back to 2 with a ragged last row.
fn guess_width(n: usize) -> usize {
    if n <= 2 {
        return n.max(1);
    }
    for w in [2usize, 3, 4] {
        if n % w == 0 {
            return w;
        }
    }
    2
}
