//! Argument repairs applied before talking to the Graph API.
//!
//! Models invent placeholder workbook sessions and loose range strings; these
//! helpers map them onto requests Graph will accept.

use serde_json::Value;

const PLACEHOLDER_SESSIONS: &[&str] = &["default", "session", "persistent", "initial", "shared"];
const MIN_SESSION_LEN: usize = 20;

/// Rows requested when only columns were given.
pub const COLUMN_ONLY_ROWS: u32 = 200;

/// A usable workbook session id, or `None` for placeholders.
pub fn workbook_session(value: Option<&Value>) -> Option<String> {
    let candidate = match value? {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("id")? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        Value::Null => return None,
        other => other.to_string(),
    };
    let trimmed = candidate.trim();
    if trimmed.is_empty()
        || PLACEHOLDER_SESSIONS.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
        || is_numbered_session(trimmed)
        || trimmed.chars().count() < MIN_SESSION_LEN
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// `session12` or `session-12`, any case.
fn is_numbered_session(s: &str) -> bool {
    let Some(prefix) = s.get(..7) else {
        return false;
    };
    if !prefix.eq_ignore_ascii_case("session") {
        return false;
    }
    let rest = &s[7..];
    let digits = rest.strip_prefix('-').unwrap_or(rest);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A range request after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub range: Option<String>,
    pub values_only: bool,
}

impl RangeRequest {
    /// The sheet's used range.
    pub fn used_range(values_only: bool) -> Self {
        Self {
            range: None,
            values_only,
        }
    }
}

/// Repair a range argument.
///
/// - empty → no range
/// - `usedrange` → no range, values only
/// - `A:Z` with a sheet → used range of that sheet, values only
/// - `A:Z` without a sheet → `A1:Z200`
pub fn range_request(
    sheet_name: Option<&str>,
    range: Option<&str>,
    values_only: bool,
) -> RangeRequest {
    let Some(trimmed) = range.map(str::trim).filter(|r| !r.is_empty()) else {
        return RangeRequest::used_range(values_only);
    };
    if trimmed.eq_ignore_ascii_case("usedrange") {
        return RangeRequest::used_range(true);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some((start, end)) = column_only(&compact) {
        if sheet_name.is_some_and(|s| !s.trim().is_empty()) {
            return RangeRequest::used_range(true);
        }
        return RangeRequest {
            range: Some(format!("{start}1:{end}{COLUMN_ONLY_ROWS}")),
            values_only,
        };
    }
    RangeRequest { range: Some(trimmed.to_string()), values_only }
}

fn column_only(range: &str) -> Option<(String, String)> {
    let (start, end) = range.split_once(':')?;
    let letters = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic());
    if letters(start) && letters(end) {
        Some((start.to_ascii_uppercase(), end.to_ascii_uppercase()))
    } else {
        None
    }
}

/// The sender address out of the shapes Graph and callers use.
pub fn sender_address(from: &Value) -> Option<String> {
    match from {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("emailAddress")
            .and_then(|e| e.get("address"))
            .or_else(|| map.get("address"))
            .or_else(|| map.get("email"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Percent-encode one URL path segment, keeping RFC 3986 `pchar`s.
pub fn segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' | b':'
            | b'@' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
