//! Paragraph-cached rendering of a growing answer.

use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::trace;

use crate::bullets::normalize_bullets;
use crate::markdown::{AutoParagraph, RenderPolicy, render_with};

/// Appended after every finalized paragraph.
pub const PARAGRAPH_SEPARATOR: &str = "<br/><br/>";

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("valid regex"));

/// Renders streamed text, re-rendering only the paragraph still being written.
///
/// Everything before the last blank line outside a code fence is rendered
/// once and cached. The tail is rendered provisionally on every [`push`].
///
/// [`push`]: IncrementalRenderer::push
#[derive(Debug, Default)]
pub struct IncrementalRenderer {
    policy: RenderPolicy,
    text: String,
    /// Byte offset into `text` where the open tail starts.
    boundary: usize,
    finalized: String,
    paragraphs: usize,
}

impl IncrementalRenderer {
    pub fn new(policy: RenderPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Append a delta and return the full markup so far.
    ///
    /// An empty delta stands for a blank SSE frame and appends a newline.
    pub fn push(&mut self, delta: &str) -> String {
        let piece = if delta.is_empty() {
            "\n".to_string()
        } else {
            normalize_bullets(&self.text, delta)
        };
        self.text.push_str(&piece);
        self.finalize_paragraphs();
        self.markup()
    }

    /// Redo the boundary pass over the complete text and return the final markup.
    pub fn finish(&mut self) -> String {
        self.boundary = 0;
        self.paragraphs = 0;
        self.finalized.clear();
        self.finalize_paragraphs();
        self.markup()
    }

    /// The accumulated, repaired source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Cached markup of all finalized paragraphs.
    pub fn finalized(&self) -> &str {
        &self.finalized
    }

    pub fn finalized_paragraphs(&self) -> usize {
        self.paragraphs
    }

    fn finalize_paragraphs(&mut self) {
        let offset = self.boundary;
        let breaks: Vec<(usize, usize)> = PARAGRAPH_BREAK
            .find_iter(&self.text[offset..])
            .map(|m| (offset + m.start(), offset + m.end()))
            .collect();

        for (start, end) in breaks {
            let paragraph = &self.text[self.boundary..start];
            // A blank line inside an open code fence does not end the paragraph.
            if !fences_balanced(paragraph) {
                continue;
            }
            if !paragraph.trim().is_empty() {
                let html = render_with(paragraph, AutoParagraph::Never, &self.policy);
                self.finalized.push_str(&html);
                self.finalized.push_str(PARAGRAPH_SEPARATOR);
                self.paragraphs += 1;
                trace!(paragraph = self.paragraphs, chars = paragraph.len(), "Finalized paragraph");
            }
            self.boundary = end;
        }
    }

    fn markup(&self) -> String {
        let tail = &self.text[self.boundary..];
        let mode = if self.boundary > 0 {
            AutoParagraph::Never
        } else {
            AutoParagraph::Fallback
        };
        let mut html = self.finalized.clone();
        html.push_str(&render_with(tail, mode, &self.policy));
        html
    }
}

fn fences_balanced(text: &str) -> bool {
    text.matches("```").count() % 2 == 0 && text.matches("~~~").count() % 2 == 0
}
