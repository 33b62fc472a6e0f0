//! Turns tool results into short observation text for the model.

use serde_json::Value;

/// Longest observation handed back to the model, in characters.
pub const OBSERVATION_CAP: usize = 4000;

const TRUNCATION_MARKER: &str = " ...[truncated]";

/// Keys reported after a bare `status` value.
const STATUS_DETAIL_KEYS: &[&str] = &[
    "eventId",
    "draftId",
    "internetMessageId",
    "attachmentId",
    "driveItemId",
    "filePath",
    "feature",
];

/// Cut `text` to `max` characters, marking the cut.
pub fn cap(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..idx]),
        None => text.to_string(),
    }
}

/// The observation text for a successful call: capped JSON of the result.
pub fn observation(result: &Value) -> String {
    let json = match result {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    cap(&json, OBSERVATION_CAP)
}

/// A one-line human summary of a tool result.
pub fn summarize(tool_name: &str, arguments: &Value, result: &Value) -> String {
    if tool_name == "calendar.event.createOrUpdate" {
        return calendar_summary(arguments, result);
    }

    if let Value::Object(map) = result {
        for key in ["message", "text", "summary", "output_text"] {
            if let Some(text) = map.get(key).and_then(Value::as_str).map(str::trim)
                && !text.is_empty()
            {
                return text.to_string();
            }
        }
        if let Some(status) = map.get("status").and_then(Value::as_str) {
            let details: Vec<String> = STATUS_DETAIL_KEYS
                .iter()
                .filter_map(|key| {
                    let value = map.get(*key)?;
                    let shown = match value {
                        Value::Null => return None,
                        Value::String(s) if s.is_empty() => return None,
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Some(format!("{key}: {shown}"))
                })
                .collect();
            return if details.is_empty() {
                status.to_string()
            } else {
                format!("{status}: {}", details.join(", "))
            };
        }
    }

    match result {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn calendar_summary(arguments: &Value, result: &Value) -> String {
    let subject = arguments
        .get("subject")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Termin");
    let status = result
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or(if arguments.get("eventId").is_some_and(|v| !v.is_null()) {
            "updated"
        } else {
            "created"
        });
    let verb = if status == "updated" { "aktualisiert" } else { "erstellt" };

    let mut sentence = format!("Termin {verb}: '{subject}'");
    let range = date_range(arguments.get("start"), arguments.get("end"));
    if !range.is_empty() {
        sentence.push_str(&format!(" ({range})"));
    }
    if let Some(id) = result.get("eventId").and_then(Value::as_str) {
        sentence.push_str(&format!(" [{id}]"));
    }
    sentence
}

#[derive(Default)]
struct Moment {
    iso: String,
    tz: String,
    date: String,
    time: String,
}

impl Moment {
    fn from_value(value: Option<&Value>) -> Self {
        let (iso, tz) = match value {
            Some(Value::String(s)) => {
                let zone = if s.ends_with('Z') { "UTC".into() } else { String::new() };
                (s.clone(), zone)
            }
            Some(Value::Object(map)) => {
                let pick = |keys: &[&str]| {
                    keys.iter()
                        .find_map(|k| map.get(*k).and_then(Value::as_str))
                        .unwrap_or_default()
                        .to_string()
                };
                (pick(&["dateTime", "date", "iso"]), pick(&["timeZone", "tz"]))
            }
            Some(Value::Null) | None => (String::new(), String::new()),
            Some(other) => (other.to_string(), String::new()),
        };
        let (date, time) = split_iso(&iso);
        Self { iso, tz, date, time }
    }

    fn segment(&self) -> String {
        match (self.date.is_empty(), self.time.is_empty()) {
            (false, false) => format!("{} {}", self.date, self.time),
            (false, true) => self.date.clone(),
            _ => self.iso.clone(),
        }
    }
}

/// `YYYY-MM-DD` and `HH:MM` out of an ISO-ish timestamp.
fn split_iso(iso: &str) -> (String, String) {
    let bytes = iso.as_bytes();
    let digits = |range: std::ops::Range<usize>| {
        bytes.get(range).is_some_and(|b| b.iter().all(u8::is_ascii_digit))
    };
    let is_date = bytes.len() >= 10
        && digits(0..4)
        && bytes[4] == b'-'
        && digits(5..7)
        && bytes[7] == b'-'
        && digits(8..10);
    if !is_date {
        return (String::new(), String::new());
    }
    let date = iso[..10].to_string();
    let has_time = bytes.len() >= 16
        && matches!(bytes[10], b'T' | b' ')
        && digits(11..13)
        && bytes[13] == b':'
        && digits(14..16);
    let time = if has_time { iso[11..16].to_string() } else { String::new() };
    (date, time)
}

fn date_range(start: Option<&Value>, end: Option<&Value>) -> String {
    let start = Moment::from_value(start);
    let end = Moment::from_value(end);
    let (a, b) = (start.segment(), end.segment());

    let range = match (a.is_empty(), b.is_empty()) {
        (false, false) if !start.date.is_empty() && start.date == end.date => {
            if !start.time.is_empty() && !end.time.is_empty() {
                format!("{} {}–{}", start.date, start.time, end.time)
            } else {
                a
            }
        }
        (false, false) => format!("{a} → {b}"),
        (false, true) => a,
        _ => b,
    };

    let tz = if !start.tz.is_empty() {
        start.tz.as_str()
    } else if !end.tz.is_empty() {
        end.tz.as_str()
    } else {
        ""
    };
    if range.is_empty() || tz.is_empty() {
        range
    } else {
        format!("{range} ({tz})")
    }
}
