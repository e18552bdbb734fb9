//! Small text utilities shared by the search phases and the assembler.

/// Levenshtein distance over code points, case-folded.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().flat_map(char::to_lowercase).collect();
    let b: Vec<char> = b.chars().flat_map(char::to_lowercase).collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// The edit-distance threshold for a fuzzy query term: short terms get less
/// slack than long ones.
pub fn fuzzy_threshold(term: &str) -> usize {
    if term.chars().count() <= 5 { 2 } else { 3 }
}

/// Split into words at anything that is neither letter nor digit.
pub fn split_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// If the first line equals `title` (case-insensitive), return the number of
/// code points to drop: the line, its newline, and any blank lines after it.
/// Returns 0 when the first line is not the title.
pub fn leading_title_len(text: &str, title: &str) -> usize {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.is_empty() || first_line.to_lowercase() != title.trim().to_lowercase() {
        return 0;
    }
    let mut dropped = first_line.chars().count();
    // The title's own newline plus any blank lines after it are a run of '\n'.
    let mut rest = text.chars().skip(dropped).peekable();
    while rest.peek() == Some(&'\n') {
        rest.next();
        dropped += 1;
    }
    dropped
}
