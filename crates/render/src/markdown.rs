//! Markdown-ish text to HTML as a pipeline of small pure steps.
//!
//! Only the subset models actually produce is handled: fenced code, headings,
//! rules, bold/italic/inline code, links, bullet/numbered/quote lines. All
//! raw text is escaped before any tag is inserted.

use std::sync::LazyLock;

use regex_lite::{Captures, Regex};

/// Thresholds for automatic paragraph breaks in unstructured prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPolicy {
    /// Break after this many sentences.
    pub sentences_per_paragraph: usize,
    /// Break at the next sentence end once a paragraph is this long.
    pub paragraph_chars: usize,
}

impl Default for RenderPolicy {
    fn default() -> Self {
        Self {
            sentences_per_paragraph: 3,
            paragraph_chars: 240,
        }
    }
}

/// Whether prose without blank lines gets paragraph breaks inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoParagraph {
    Never,
    #[default]
    Fallback,
}

const PLACEHOLDER_PREFIX: &str = "[[[BLOCK";

static FENCE_BACKTICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([a-zA-Z0-9_-]*)\n(.*?)```").expect("valid regex"));
static FENCE_TILDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)~~~([a-zA-Z0-9_-]*)\n(.*?)~~~").expect("valid regex"));
static RENDERED_PRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<pre><code data-lang="[a-zA-Z0-9_-]*">[^<]*</code></pre>"#).expect("valid regex")
});
static RENDERED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a href="https?://[^"<>\s]*" target="_blank" rel="noreferrer noopener">[^<]*</a>"#)
        .expect("valid regex")
});
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[\[BLOCK(\d+)\]\]\]").expect("valid regex"));

static RULE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*---\s*").expect("valid regex"));
static SENTENCE_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])\n(\s*[A-Za-z0-9ÄÖÜ])").expect("valid regex"));
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*•]\s+|\d+[.)]\s+)").expect("valid regex"));
static BLOCK_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?(?:p|blockquote|h[1-6])>|<br/>|<hr/>").expect("valid regex"));

static SAFE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:amp|lt|gt|quot|#39);|</?(?:p|strong|em|code|blockquote|h[1-6])>|<br/>|<hr/>")
        .expect("valid regex")
});

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid regex"));
static STAR_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\s](?:[^*\n]*[^*\s])?)\*").expect("valid regex"));
static UNDERSCORE_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\w])_([^_\n]+)_").expect("valid regex"));

static NUMBER_AFTER_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([:.)!\]])\s*(\d+\.\s+)").expect("valid regex"));
static DASH_AFTER_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([:.)!\]])\s*(-\s+)").expect("valid regex"));

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#{1,6})[ \t]+(.+)$").expect("valid regex"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<]+[^<.,:;"')\]\s]"#).expect("valid regex"));

static BULLET_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*•]\s+").expect("valid regex"));
static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+").expect("valid regex"));
static QUOTE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*&gt;\s+").expect("valid regex"));
static BLOCK_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:<p>|<blockquote>|<pre>|<hr/>|<h[1-6]>|\[\[\[BLOCK\d+\]\]\])")
        .expect("valid regex")
});
static HAS_BLOCKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p|<blockquote|<hr/?|<h[1-6]").expect("valid regex"));
static NEWLINE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\n+").expect("valid regex"));

/// Render with the default [`RenderPolicy`].
pub fn render(text: &str, mode: AutoParagraph) -> String {
    render_with(text, mode, &RenderPolicy::default())
}

pub fn render_with(text: &str, mode: AutoParagraph, policy: &RenderPolicy) -> String {
    if text.is_empty() {
        return String::new();
    }

    let src = normalize_newlines(text);
    let (src, protected) = extract_protected(&src);
    let mut src = normalize_rules(&src);
    if mode == AutoParagraph::Fallback {
        src = fallback_sentence_breaks(&src);
        src = auto_paragraph(&src, policy);
    }
    let src = hard_breaks(&src);

    let html = escape_text(&src);
    let html = horizontal_rules(&html);
    let html = inline_markup(&html);
    let html = inline_list_breaks(&html);
    let html = headings(&html);
    let html = autolinks(&html);
    let html = group_lines(&html);
    let html = cleanup_newlines(&html);
    restore_protected(&html, &protected)
}

/// A span lifted out of the text before any other step runs.
#[derive(Debug)]
enum Protected {
    Fence { lang: String, code: String },
    /// Markup this renderer produced on an earlier pass.
    Rendered(String),
}

impl Protected {
    fn to_html(&self) -> String {
        match self {
            Self::Fence { lang, code } => {
                format!(r#"<pre><code data-lang="{lang}">{}</code></pre>"#, escape_html(code))
            }
            Self::Rendered(html) => html.clone(),
        }
    }
}

fn placeholder(index: usize) -> String {
    format!("{PLACEHOLDER_PREFIX}{index}]]]")
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

fn extract_protected(text: &str) -> (String, Vec<Protected>) {
    let mut blocks = Vec::new();
    let mut src = text.to_string();

    for fence in [&*FENCE_BACKTICK, &*FENCE_TILDE] {
        src = fence
            .replace_all(&src, |caps: &Captures<'_>| {
                blocks.push(Protected::Fence {
                    lang: caps[1].to_string(),
                    code: caps[2].to_string(),
                });
                placeholder(blocks.len() - 1)
            })
            .into_owned();
    }
    for rendered in [&*RENDERED_PRE, &*RENDERED_LINK] {
        src = rendered
            .replace_all(&src, |caps: &Captures<'_>| {
                blocks.push(Protected::Rendered(caps[0].to_string()));
                placeholder(blocks.len() - 1)
            })
            .into_owned();
    }
    (src, blocks)
}

/// `---` anywhere becomes a line of its own.
fn normalize_rules(text: &str) -> String {
    RULE_MARKER.replace_all(text, "\n---\n").into_owned()
}

/// A single newline after a sentence end is taken as a paragraph break.
fn fallback_sentence_breaks(text: &str) -> String {
    SENTENCE_NEWLINE.replace_all(text, "${1}\n\n${2}").into_owned()
}

/// Insert paragraph breaks into long unstructured prose.
///
/// Skipped when the text already has paragraphs, list lines or block markup.
fn auto_paragraph(text: &str, policy: &RenderPolicy) -> String {
    if text.contains("\n\n") || LIST_MARKER.is_match(text) || BLOCK_MARKUP.is_match(text) {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut written = 0usize;
    let mut paragraph_start = 0usize;
    let mut sentences = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        out.push(ch);
        written += 1;

        if matches!(ch, '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if chars.get(j).is_some_and(|c| c.is_uppercase()) {
                sentences += 1;
                let long = written - paragraph_start >= policy.paragraph_chars;
                if sentences >= policy.sentences_per_paragraph || long {
                    out.push_str("\n\n");
                    written += 2;
                    sentences = 0;
                    paragraph_start = written;
                } else {
                    out.push(' ');
                    written += 1;
                }
                i = j;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Markdown hard breaks (two trailing spaces) end a paragraph.
fn hard_breaks(text: &str) -> String {
    text.replace("  \n", "\n\n")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape everything except entities and the bare tags this renderer emits.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for token in SAFE_TOKEN.find_iter(text) {
        out.push_str(&escape_html(&text[last..token.start()]));
        out.push_str(token.as_str());
        last = token.end();
    }
    out.push_str(&escape_html(&text[last..]));
    out
}

fn is_rule(line: &str) -> bool {
    let line = line.trim();
    line.chars().count() >= 3 && line.chars().all(|c| matches!(c, '-' | '*' | '_'))
}

fn horizontal_rules(html: &str) -> String {
    html.split('\n')
        .map(|line| if is_rule(line) { "<hr/>" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline_markup(html: &str) -> String {
    let html = INLINE_CODE.replace_all(html, "<code>${1}</code>");
    let html = BOLD.replace_all(&html, "<strong>${1}</strong>");
    let html = STAR_ITALIC.replace_all(&html, "<em>${1}</em>");
    underscore_italics(&html)
}

/// `_text_` outside words, so `snake_case` names survive.
fn underscore_italics(html: &str) -> String {
    UNDERSCORE_ITALIC
        .replace_all(html, |caps: &Captures<'_>| {
            let end = caps.get(0).map_or(html.len(), |m| m.end());
            let closes = html[end..]
                .chars()
                .next()
                .is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
            if closes {
                format!("{}<em>{}</em>", &caps[1], &caps[2])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Move `1. ` and `- ` markers that follow punctuation onto their own line.
fn inline_list_breaks(html: &str) -> String {
    let html = NUMBER_AFTER_PUNCT.replace_all(html, "${1}\n${2}");
    DASH_AFTER_PUNCT.replace_all(&html, "${1}\n${2}").into_owned()
}

fn headings(html: &str) -> String {
    HEADING
        .replace_all(html, |caps: &Captures<'_>| {
            let level = caps[1].len();
            let content = caps[2].trim();
            if content.is_empty() {
                caps[0].to_string()
            } else {
                format!("<h{level}>{content}</h{level}>")
            }
        })
        .into_owned()
}

/// Split off an escaped quote or bracket the URL pattern swallowed.
fn split_trailing_entity(url: &str) -> (&str, &str) {
    if let Some(amp) = url.rfind('&')
        && matches!(&url[amp + 1..], "quot" | "#39" | "gt" | "lt" | "amp")
    {
        return url.split_at(amp);
    }
    (url, "")
}

fn autolinks(html: &str) -> String {
    URL.replace_all(html, |caps: &Captures<'_>| {
        let (url, rest) = split_trailing_entity(&caps[0]);
        format!(r#"<a href="{url}" target="_blank" rel="noreferrer noopener">{url}</a>{rest}"#)
    })
    .into_owned()
}

fn flush_block(items: &mut Vec<String>, out: &mut Vec<String>, tag: &str) {
    if items.is_empty() {
        return;
    }
    out.push(format!("<{tag}>{}</{tag}>", items.join("<br/>")));
    items.clear();
}

/// Group bullet, numbered and quote lines into blocks; wrap prose in `<p>`.
fn group_lines(html: &str) -> String {
    let mut out = Vec::new();
    let mut list = Vec::new();
    let mut quote = Vec::new();

    for line in html.split('\n') {
        if let Some(marker) = BULLET_LINE.find(line) {
            flush_block(&mut quote, &mut out, "blockquote");
            list.push(format!("• {}", &line[marker.end()..]));
            continue;
        }
        if NUMBERED_LINE.is_match(line) {
            flush_block(&mut quote, &mut out, "blockquote");
            list.push(line.trim().to_string());
            continue;
        }
        if let Some(marker) = QUOTE_LINE.find(line) {
            flush_block(&mut list, &mut out, "p");
            quote.push(line[marker.end()..].to_string());
            continue;
        }

        flush_block(&mut list, &mut out, "p");
        flush_block(&mut quote, &mut out, "blockquote");
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if BLOCK_START.is_match(trimmed) {
            out.push(trimmed.to_string());
        } else {
            out.push(format!("<p>{line}</p>"));
        }
    }
    flush_block(&mut list, &mut out, "p");
    flush_block(&mut quote, &mut out, "blockquote");
    out.concat()
}

fn cleanup_newlines(html: &str) -> String {
    if HAS_BLOCKS.is_match(html) {
        return html.replace('\n', "");
    }
    NEWLINE_RUN.replace_all(html, "<br/><br/>").replace('\n', "<br/>")
}

fn restore_protected(html: &str, blocks: &[Protected]) -> String {
    if blocks.is_empty() {
        return html.to_string();
    }
    PLACEHOLDER
        .replace_all(html, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| blocks.get(i))
                .map_or_else(|| caps[0].to_string(), Protected::to_html)
        })
        .into_owned()
}
