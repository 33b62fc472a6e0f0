//! Incremental rendering of streamed agent answers into safe HTML.
//!
//! Text arrives in small deltas. [`IncrementalRenderer`] repairs bullet
//! markers glued to the previous token, caches every paragraph once a blank
//! line closes it, and re-renders only the open tail on each update.
//!
//! [`render`] is the pure pipeline underneath: protect code, escape, apply
//! inline markup, group lines into blocks, restore code. Running it over its
//! own output changes nothing.

pub mod bullets;
pub mod incremental;
pub mod markdown;

pub use bullets::normalize_bullets;
pub use incremental::{IncrementalRenderer, PARAGRAPH_SEPARATOR};
pub use markdown::{AutoParagraph, RenderPolicy, render, render_with};
