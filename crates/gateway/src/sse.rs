//! Server-sent-event framing of agent stream events.
//!
//! Text deltas become unnamed `data:` frames. Long lines are cut into pieces
//! of at most `chunk_size` characters so clients can render incrementally;
//! cuts prefer sentence ends, then word boundaries.
//!
//! ```text
//! data: Erster Satz.
//!
//! data: Zweiter Satz.
//!
//! event: end
//! data: [DONE]
//!
//! ```

use axum::body::Bytes;
use toolwright_agent::StreamEvent;
use toolwright_config::{MIN_SSE_CHUNK_SIZE, SseConfig};

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Encodes [`StreamEvent`]s into wire frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SseEncoder {
    split: bool,
    chunk_size: usize,
}

impl Default for SseEncoder {
    fn default() -> Self {
        Self::new(true, 80)
    }
}

impl SseEncoder {
    /// `chunk_size` below the minimum is raised to it.
    pub fn new(split: bool, chunk_size: usize) -> Self {
        Self {
            split,
            chunk_size: chunk_size.max(MIN_SSE_CHUNK_SIZE),
        }
    }

    pub fn from_config(config: &SseConfig) -> Self {
        Self::new(config.split, config.chunk_size)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// The frames for one event. Empty deltas encode to nothing.
    pub fn encode(&self, event: &StreamEvent) -> Bytes {
        let mut out = String::new();
        let payload = match event {
            StreamEvent::Delta(text) => {
                self.encode_text(&mut out, text);
                None
            }
            StreamEvent::Trace(records) => {
                Some(serde_json::to_string(records).unwrap_or_else(|_| "[]".into()))
            }
            StreamEvent::Error(err) => Some(
                serde_json::to_string(err)
                    .unwrap_or_else(|_| r#"{"message":"Agent failed"}"#.into()),
            ),
            StreamEvent::End => Some("[DONE]".to_string()),
        };
        if let (Some(name), Some(payload)) = (event.event_name(), payload) {
            named_frame(&mut out, name, &payload);
        }
        Bytes::from(out)
    }

    fn encode_text(&self, out: &mut String, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.split {
            data_frame(out, text);
            return;
        }

        let mut last_blank = false;
        for line in split_lines(text) {
            let blank = line.is_empty();
            if blank && last_blank {
                continue;
            }
            if line.chars().count() <= self.chunk_size {
                data_frame(out, line);
                last_blank = blank;
                continue;
            }
            for piece in self.split_long_line(line) {
                data_frame(out, &piece);
            }
            // Explicit break between long logical lines
            data_frame(out, "");
            last_blank = true;
        }
    }

    /// Cut a line into pieces of at most `chunk_size` characters.
    fn split_long_line(&self, line: &str) -> Vec<String> {
        let chars: Vec<char> = line.chars().collect();
        let n = chars.len();
        let size = self.chunk_size;
        let mut pieces = Vec::new();
        let mut i = 0;

        while i < n {
            let end = (i + size).min(n);
            // Last index searched; the character at `end` would overflow the window.
            let search_end = (i + 1).max(end - 1).min(n - 1);
            let window = &chars[i..=search_end];

            let terminator = window.iter().rposition(|c| SENTENCE_TERMINATORS.contains(c));
            let space = window
                .iter()
                .rposition(|c| *c == ' ')
                .filter(|offset| *offset >= size / 2);

            let j = match (terminator, space) {
                (Some(offset), _) => (i + offset + 1).min(n),
                (None, Some(offset)) => i + offset + 1,
                (None, None) => end,
            };

            let piece: String = chars[i..j].iter().collect();
            let piece = piece.trim_start();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            i = j;
        }
        pieces
    }
}

/// Split on `\n` and `\r\n`.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// `data:` lines for every payload line, one blank line closing the frame.
fn data_frame(out: &mut String, payload: &str) {
    let mut last_blank = false;
    for line in split_lines(payload) {
        let blank = line.is_empty();
        if blank && last_blank {
            continue;
        }
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
        last_blank = blank;
    }
    out.push('\n');
}

fn named_frame(out: &mut String, event: &str, payload: &str) {
    out.push_str("event: ");
    out.push_str(event);
    out.push('\n');
    for line in split_lines(payload) {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
}
