//! Table output for the CLI listings.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use std::io::IsTerminal;
use terminal_size::{Width, terminal_size};

/// A bordered listing with a header row, sized to the terminal (or the
/// `COLUMNS` override) and colored only when stdout is a terminal.
pub struct Listing {
    table: Table,
}

impl Listing {
    pub fn new(headers: &[&str]) -> Listing {
        Listing::styled(headers, output_width(), use_color())
    }

    fn styled(headers: &[&str], width: Option<u16>, color: bool) -> Listing {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = width {
            table.set_width(width);
        }
        table.set_header(
            headers
                .iter()
                .map(|h| {
                    if color {
                        Cell::new(h).add_attribute(Attribute::Bold)
                    } else {
                        Cell::new(h)
                    }
                })
                .collect::<Vec<_>>(),
        );
        Listing { table }
    }

    pub fn row(&mut self, cells: Vec<Cell>) -> &mut Listing {
        self.table.add_row(cells);
        self
    }

    pub fn print(self) {
        println!("{}", self.table);
    }

    fn rendered(&self) -> String {
        self.table.to_string()
    }
}

/// Ids overflow their column: note UUIDs keep their first and last groups,
/// `x-coredata://` attachment ids keep the scheme and the trailing `p<pk>`.
pub fn short_id(id: &str) -> String {
    let id = id.trim();
    if id.chars().count() <= 24 {
        return id.to_string();
    }
    if let Some(pk) = id.rsplit('/').next()
        && id.starts_with("x-coredata://")
    {
        return format!("x-coredata://…/{pk}");
    }
    let first = id.split('-').next().unwrap_or(id);
    let last = id.rsplit('-').next().unwrap_or(id);
    if first.len() + last.len() < id.len() {
        format!("{first}…{last}")
    } else {
        let head: String = id.chars().take(16).collect();
        format!("{head}…")
    }
}

fn output_width() -> Option<u16> {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse().ok())
        .or_else(|| terminal_size().map(|(Width(w), _)| w))
}

fn use_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_keeps_short_ids() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(" NOTE-7 "), "NOTE-7");
    }

    #[test]
    fn short_id_keeps_uuid_ends() {
        let id = "A1B2C3D4-EEEE-FFFF-0000-123456789ABC";
        assert_eq!(short_id(id), "A1B2C3D4…123456789ABC");
    }

    #[test]
    fn short_id_keeps_coredata_scheme_and_pk() {
        let id = "x-coredata://AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE/ICAttachment/p1393";
        assert_eq!(short_id(id), "x-coredata://…/p1393");
    }

    #[test]
    fn short_id_truncates_undashed_ids() {
        let id = "Z".repeat(40);
        let s = short_id(&id);
        assert!(s.ends_with('…'));
        assert!(s.chars().count() <= 17);
    }

    #[test]
    fn listing_renders_headers_and_rows() {
        let mut listing = Listing::styled(&["Folder", "Notes"], Some(30), false);
        listing.row(vec![Cell::new("Work"), Cell::new(7)]);
        listing.row(vec![Cell::new("Home"), Cell::new(2)]);
        let out = listing.rendered();
        assert!(out.contains("Folder"));
        assert!(out.contains("Work"));
        assert!(out.contains('7'));
        assert!(out.lines().all(|l| l.chars().count() <= 30));
    }
}
