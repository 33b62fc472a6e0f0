//! LLM provider implementations for Toolwright.
//!
//! All providers implement the `toolwright_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
