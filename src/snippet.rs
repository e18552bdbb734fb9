//! Windowed excerpt extraction with `**` term highlighting.

/// Extract an excerpt of `text` around the earliest occurrence of any term,
/// wrapping every term match in `**…**`. `window` is in characters. Returns
/// `None` when no term occurs.
pub fn extract(text: &str, terms: &[String], window: usize) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let lower: Vec<char> = chars.iter().flat_map(|c| c.to_lowercase()).collect();
    // Lowercasing can expand some code points; fall back to a per-char
    // first-lowercase mapping so offsets stay aligned.
    let lower = if lower.len() == chars.len() {
        lower
    } else {
        chars
            .iter()
            .map(|c| c.to_lowercase().next().unwrap_or(*c))
            .collect()
    };

    let term_chars: Vec<Vec<char>> = terms
        .iter()
        .map(|t| t.to_lowercase().chars().collect())
        .filter(|t: &Vec<char>| !t.is_empty())
        .collect();
    if term_chars.is_empty() {
        return None;
    }

    let p = term_chars
        .iter()
        .filter_map(|t| find_sub(&lower, t, 0))
        .min()?;

    let start = p.saturating_sub(window);
    let end = (p + window + 20).min(chars.len());
    let mut excerpt: String = chars[start..end].iter().collect();
    if start > 0 {
        excerpt = format!("…{excerpt}");
    }
    if end < chars.len() {
        excerpt.push('…');
    }

    let highlighted = highlight(&excerpt, &term_chars);
    let collapsed = collapse_whitespace(&highlighted);
    Some(collapsed.trim().to_string())
}

/// Wrap every case-insensitive term occurrence in `**…**`.
fn highlight(text: &str, terms: &[Vec<char>]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    // Collect match spans, longest-first at each position so overlapping
    // terms do not split each other's markers.
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let hit = terms
            .iter()
            .filter(|t| lower[i..].starts_with(t))
            .map(Vec::len)
            .max();
        if let Some(len) = hit {
            spans.push((i, i + len));
            i += len;
        } else {
            i += 1;
        }
    }

    let mut out = String::with_capacity(text.len() + spans.len() * 4);
    let mut cursor = 0usize;
    for (start, end) in spans {
        out.extend(&chars[cursor..start]);
        out.push_str("**");
        out.extend(&chars[start..end]);
        out.push_str("**");
        cursor = end;
    }
    out.extend(&chars[cursor..]);
    out
}

fn find_sub(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn match_is_wrapped_and_windowed() {
        let text = "x".repeat(100) + " kubectl tips " + &"y".repeat(100);
        let s = extract(&text, &terms(&["kubectl"]), 20).unwrap();
        assert!(s.contains("**kubectl**"));
        assert!(s.starts_with('…'));
        assert!(s.ends_with('…'));
        assert!(s.chars().count() < 80);
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(extract("plain text", &terms(&["missing"]), 40), None);
        assert_eq!(extract("plain text", &[], 40), None);
    }

    #[test]
    fn match_at_start_has_no_leading_ellipsis() {
        let s = extract("kubectl notes and more", &terms(&["kubectl"]), 40).unwrap();
        assert!(s.starts_with("**kubectl**"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let s = extract("Kubectl Tricks", &terms(&["kubectl", "tricks"]), 40).unwrap();
        assert!(s.contains("**Kubectl**"));
        assert!(s.contains("**Tricks**"));
    }

    #[test]
    fn every_occurrence_in_window_is_wrapped() {
        let s = extract("ab ab ab", &terms(&["ab"]), 40).unwrap();
        assert_eq!(s.matches("**ab**").count(), 3);
    }

    #[test]
    fn whitespace_runs_collapse() {
        let s = extract("a  match\t\there", &terms(&["match"]), 40).unwrap();
        assert_eq!(s, "a **match** here");
    }

    #[test]
    fn earliest_term_wins_the_window() {
        let text = format!("{} zulu {} alpha", "x".repeat(50), "y".repeat(200));
        let s = extract(&text, &terms(&["alpha", "zulu"]), 10).unwrap();
        assert!(s.contains("**zulu**"));
        assert!(!s.contains("alpha"));
    }

    #[test]
    fn multibyte_text_is_windowed_by_chars() {
        let text = "é".repeat(60) + "señor" + &"ü".repeat(60);
        let s = extract(&text, &terms(&["señor"]), 10).unwrap();
        assert!(s.contains("**señor**"));
    }
}
