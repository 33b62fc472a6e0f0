//! Streaming repair for list markers.
//!
//! Token-by-token delivery often glues a bullet to the end of the previous
//! item (`"Erstens.- zweitens"`). The repair puts each marker back on its own
//! line before the text is rendered.

use std::sync::LazyLock;

use regex_lite::Regex;

static LEADING_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]\s+|\d+\.\s+)").expect("valid regex"));

/// Repair `chunk` given the text accumulated before it.
///
/// Inserts a newline before `-`, `*`, `•` and `N.` markers that follow other
/// text on the same line. A `*` right after another `*` closes a bold pair
/// and is never treated as a marker.
pub fn normalize_bullets(prev: &str, chunk: &str) -> String {
    if chunk.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(chunk.len() + 8);
    if !prev.is_empty() && !prev.ends_with('\n') && LEADING_MARKER.is_match(chunk) {
        out.push('\n');
    }

    let chars: Vec<char> = chunk.chars().collect();
    for (k, &c) in chars.iter().enumerate() {
        if k > 0 {
            let before = chars[k - 1];
            if before != '\n' && marker_at(&chars, k, before) {
                out.push('\n');
            }
        }
        out.push(c);
    }
    out
}

fn marker_at(chars: &[char], k: usize, before: char) -> bool {
    match chars[k] {
        '-' | '•' => followed_by_space(chars, k + 1),
        '*' => before != '*' && followed_by_space(chars, k + 1),
        c if c.is_ascii_digit() => !before.is_ascii_digit() && numbered_marker(chars, k),
        _ => false,
    }
}

fn followed_by_space(chars: &[char], i: usize) -> bool {
    chars.get(i).is_some_and(|c| c.is_whitespace())
}

/// Digits, a dot, then whitespace.
fn numbered_marker(chars: &[char], start: usize) -> bool {
    let mut i = start;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    chars.get(i) == Some(&'.') && followed_by_space(chars, i + 1)
}
