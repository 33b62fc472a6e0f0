//! # Toolwright Core
//!
//! Domain types, traits, and error definitions for the Toolwright agent runtime.
//! This crate has **no framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam (model backend, tool handler) is a trait here. Implementations
//! live in their respective crates, which keeps the dependency graph pointing
//! inward and lets tests swap in stubs.

pub mod content;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use content::{Content, ContentPart};
pub use error::{CredentialError, Error, ProviderError, Result, ToolError, UpstreamError};
pub use message::{ConversationThread, Message, MessageToolCall, Role, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolSchema};
pub use tool::{Manifest, ToolCall, ToolCallRequest, ToolDefinition, ToolHandler, ToolMetadata};
