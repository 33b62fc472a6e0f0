//! The Microsoft 365 toolset: mail, calendar, drive, workbook, token and
//! feature-toggle tools over a [`GraphBackend`].

pub mod features;
pub mod graph;
mod handlers;
pub mod normalize;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use toolwright_config::ToolsConfig;
use toolwright_core::error::ToolError;
use toolwright_core::tool::ToolHandler;
use toolwright_security::TokenManager;

use crate::dispatcher::{Dispatcher, DispatcherBuilder};
use crate::manifest::m365_manifest;

pub use features::{FeatureRecord, FeatureStore};
pub use graph::{DEFAULT_GRAPH_BASE_URL, GraphBackend, GraphBody, GraphClient, GraphRequest};
pub use handlers::MAX_RETURNED_ROWS;

/// Shared dependencies of every `m365` handler.
pub struct M365Context {
    pub graph: Arc<dyn GraphBackend>,
    pub tokens: Arc<TokenManager>,
    pub features: Arc<FeatureStore>,
    pub graph_base_url: String,
}

impl std::fmt::Debug for M365Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("M365Context")
            .field("graph_base_url", &self.graph_base_url)
            .field("features", &self.features.len())
            .finish()
    }
}

impl M365Context {
    pub fn new(graph: Arc<dyn GraphBackend>, tokens: Arc<TokenManager>) -> Self {
        Self {
            graph,
            tokens,
            features: Arc::new(FeatureStore::new()),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
        }
    }

    /// Context backed by a real [`GraphClient`].
    pub fn from_config(config: &ToolsConfig, tokens: Arc<TokenManager>) -> Result<Self, ToolError> {
        let base_url = config.graph_base_url.trim_end_matches('/').to_string();
        let client = GraphClient::new(base_url.clone(), Arc::clone(&tokens))?;
        Ok(Self {
            graph: Arc::new(client),
            tokens,
            features: Arc::new(FeatureStore::new()),
            graph_base_url: base_url,
        })
    }
}

/// Which tool a [`M365Tool`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum M365Op {
    LatestMessage,
    FetchMessage,
    ReplyDraft,
    SendMessage,
    DownloadAttachment,
    UploadAndAttach,
    ListEvents,
    CreateOrUpdateEvent,
    CancelEvent,
    UploadFile,
    ListSheets,
    ReadRange,
    UpdateRange,
    HealthCheck,
    AcquireToken,
    ToggleFeature,
}

impl M365Op {
    pub const ALL: [M365Op; 16] = [
        Self::LatestMessage,
        Self::FetchMessage,
        Self::ReplyDraft,
        Self::SendMessage,
        Self::DownloadAttachment,
        Self::UploadAndAttach,
        Self::ListEvents,
        Self::CreateOrUpdateEvent,
        Self::CancelEvent,
        Self::UploadFile,
        Self::ListSheets,
        Self::ReadRange,
        Self::UpdateRange,
        Self::HealthCheck,
        Self::AcquireToken,
        Self::ToggleFeature,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::LatestMessage => "mail.latestMessage.get",
            Self::FetchMessage => "mail.message.fetch",
            Self::ReplyDraft => "mail.message.replyDraft",
            Self::SendMessage => "mail.message.send",
            Self::DownloadAttachment => "mail.attachment.download",
            Self::UploadAndAttach => "mail.attachment.uploadAndAttach",
            Self::ListEvents => "calendar.events.list",
            Self::CreateOrUpdateEvent => "calendar.event.createOrUpdate",
            Self::CancelEvent => "calendar.event.cancel",
            Self::UploadFile => "drive.file.upload",
            Self::ListSheets => "excel.workbook.listSheets",
            Self::ReadRange => "excel.workbook.readRange",
            Self::UpdateRange => "excel.workbook.updateRange",
            Self::HealthCheck => "graph.health.check",
            Self::AcquireToken => "graph.token.acquire",
            Self::ToggleFeature => "tooling.feature.toggle",
        }
    }
}

/// A [`ToolHandler`] for one `m365` tool.
#[derive(Debug, Clone)]
pub struct M365Tool {
    op: M365Op,
    ctx: Arc<M365Context>,
}

impl M365Tool {
    pub fn new(op: M365Op, ctx: Arc<M365Context>) -> Self {
        Self { op, ctx }
    }
}

#[async_trait]
impl ToolHandler for M365Tool {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let ctx = self.ctx.as_ref();
        match self.op {
            M365Op::LatestMessage => handlers::latest_message(ctx, arguments).await,
            M365Op::FetchMessage => handlers::fetch_message(ctx, arguments).await,
            M365Op::ReplyDraft => handlers::reply_draft(ctx, arguments).await,
            M365Op::SendMessage => handlers::send_message(ctx, arguments).await,
            M365Op::DownloadAttachment => handlers::download_attachment(ctx, arguments).await,
            M365Op::UploadAndAttach => handlers::upload_and_attach(ctx, arguments).await,
            M365Op::ListEvents => handlers::list_events(ctx, arguments).await,
            M365Op::CreateOrUpdateEvent => handlers::create_or_update_event(ctx, arguments).await,
            M365Op::CancelEvent => handlers::cancel_event(ctx, arguments).await,
            M365Op::UploadFile => handlers::upload_file(ctx, arguments).await,
            M365Op::ListSheets => handlers::list_sheets(ctx, arguments).await,
            M365Op::ReadRange => handlers::read_range(ctx, arguments).await,
            M365Op::UpdateRange => handlers::update_range(ctx, arguments).await,
            M365Op::HealthCheck => handlers::health_check(ctx, arguments).await,
            M365Op::AcquireToken => handlers::acquire_token(ctx, arguments).await,
            M365Op::ToggleFeature => handlers::toggle_feature(ctx, arguments).await,
        }
    }
}

/// Register every `m365` handler on `builder`.
pub fn register(builder: DispatcherBuilder, ctx: Arc<M365Context>) -> DispatcherBuilder {
    M365Op::ALL.iter().fold(builder, |builder, op| {
        builder.handler(op.tool_name(), M365Tool::new(*op, Arc::clone(&ctx)))
    })
}

/// The `m365` manifest with all handlers bound to `ctx`.
pub fn dispatcher(ctx: Arc<M365Context>) -> Result<Dispatcher, ToolError> {
    register(Dispatcher::builder(m365_manifest()), ctx).build()
}

#[cfg(test)]
mod tests;
