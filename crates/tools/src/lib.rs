//! Tool layer for Toolwright agents.
//!
//! - [`Dispatcher`]: manifest + compiled validators + handlers, built once
//! - [`m365`]: the Microsoft 365 toolset over a pluggable [`m365::GraphBackend`]
//! - [`postgres`]: the PostgreSQL toolset, served by an MCP server
//! - [`mcp`]: stdio JSON-RPC client for MCP tool servers
//! - [`summarize`]: observation text handed back to the model

pub mod dispatcher;
pub mod m365;
pub mod manifest;
pub mod mcp;
pub mod postgres;
pub mod summarize;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use manifest::{M365_NAMESPACE, POSTGRES_NAMESPACE, m365_manifest, postgres_manifest};
pub use mcp::{McpClient, RemoteTools};
pub use summarize::{OBSERVATION_CAP, cap, observation, summarize};
