//! One handler per `m365` tool.
//!
//! Arguments arrive already validated and defaulted. Every handler returns a
//! compact summary object; raw attachment bytes and whole sheets never leave
//! this module.

use std::path::Path;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};
use toolwright_core::error::ToolError;
use toolwright_security::ScopeSet;
use tracing::debug;

use super::M365Context;
use super::graph::GraphRequest;
use super::normalize::{range_request, segment, sender_address, workbook_session};

/// Most rows returned from a range read.
pub const MAX_RETURNED_ROWS: usize = 200;

const BASE_MESSAGE_FIELDS: &[&str] = &["id", "subject", "receivedDateTime", "from", "webLink"];

// ---- argument helpers -------------------------------------------------------

fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn req_str<'a>(tool: &str, args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    opt_str(args, key).ok_or_else(|| ToolError::Validation {
        tool_name: tool.to_string(),
        errors: vec![format!("$.{key}: must not be empty")],
    })
}

fn flag(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn str_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Drop `null` members of a top-level object.
fn compact(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect())
        }
        other => other,
    }
}

fn failed(tool: &str, reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.to_string(),
        reason: reason.into(),
    }
}

async fn read_file(tool: &str, path: &str) -> Result<Vec<u8>, ToolError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| failed(tool, format!("failed to read {path}: {e}")))
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn etag_of(value: &Value) -> Option<String> {
    value
        .get("@odata.etag")
        .or_else(|| value.get("etag"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ---- mail ----------------------------------------------------------------

pub(crate) async fn latest_message(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    let folder = opt_str(&args, "folderId").unwrap_or("inbox");
    let mut select: Vec<String> = BASE_MESSAGE_FIELDS.iter().map(|s| s.to_string()).collect();
    if flag(&args, "includeBodyPreview", false) {
        select.push("bodyPreview".into());
    }
    for field in str_list(&args, "select") {
        if !select.contains(&field) {
            select.push(field);
        }
    }

    let data = ctx
        .graph
        .send(
            GraphRequest::get(format!("/me/mailFolders/{}/messages", segment(folder)))
                .query("$orderby", "receivedDateTime desc")
                .query("$top", "1")
                .query("$select", select.join(",")),
        )
        .await?;

    let Some(message) = data.get("value").and_then(Value::as_array).and_then(|v| v.first()) else {
        return Ok(json!({ "message": format!("Keine Nachricht im Ordner '{folder}' gefunden.") }));
    };
    Ok(compact(json!({
        "messageId": message.get("id").or_else(|| message.get("messageId")),
        "subject": message.get("subject"),
        "receivedDateTime": message.get("receivedDateTime"),
        "from": message.get("from").and_then(sender_address),
        "webLink": message.get("webLink"),
        "bodyPreview": message.get("bodyPreview"),
    })))
}

pub(crate) async fn fetch_message(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "mail.message.fetch";
    let message_id = req_str(TOOL, &args, "messageId")?;

    let mut request = GraphRequest::get(format!("/me/messages/{}", segment(message_id)));
    if flag(&args, "preferTextBody", true) {
        request = request.prefer("outlook.body-content-type=\"text\"");
    }
    if flag(&args, "expandAttachments", false) {
        request = request.query("$expand", "attachments");
    }
    let data = ctx.graph.send(request).await?;

    let body = match data.get("body") {
        Some(Value::Object(body)) => body.get("content").cloned(),
        Some(other) => Some(other.clone()),
        None => None,
    };
    let attachments = data.get("attachments").and_then(Value::as_array).map(|items| {
        items
            .iter()
            .map(|a| {
                compact(json!({
                    "id": a.get("id"),
                    "name": a.get("name"),
                    "contentType": a.get("contentType"),
                    "size": a.get("size"),
                }))
            })
            .collect::<Vec<_>>()
    });

    Ok(compact(json!({
        "messageId": data.get("id").and_then(Value::as_str).unwrap_or(message_id),
        "subject": data.get("subject"),
        "from": data.get("from").and_then(sender_address),
        "body": body,
        "headers": data.get("internetMessageHeaders").or_else(|| data.get("headers")),
        "attachments": attachments,
    })))
}

pub(crate) async fn reply_draft(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "mail.message.replyDraft";
    let message_id = req_str(TOOL, &args, "messageId")?;
    let body = req_str(TOOL, &args, "body")?;
    let content_type = opt_str(&args, "contentType").unwrap_or("Text");
    let prefer = str_list(&args, "preferHeaders");
    let with_prefer = |mut request: GraphRequest| {
        for p in &prefer {
            request = request.prefer(p.clone());
        }
        request
    };

    let draft = ctx
        .graph
        .send(with_prefer(GraphRequest::post(format!(
            "/me/messages/{}/createReply",
            segment(message_id)
        ))))
        .await?;
    let draft_id = draft
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| failed(TOOL, "createReply returned no draft id"))?
        .to_string();
    let etag = etag_of(&draft);

    let mut patch = with_prefer(GraphRequest::patch(format!("/me/messages/{}", segment(&draft_id))))
        .json(json!({ "body": { "contentType": content_type, "content": body } }));
    if let Some(tag) = &etag {
        patch = patch.header("If-Match", tag.clone());
    }
    let patched = ctx.graph.send(patch).await?;
    let etag = etag_of(&patched).or(etag);

    ctx.graph
        .send(with_prefer(GraphRequest::post(format!(
            "/me/messages/{}/send",
            segment(&draft_id)
        ))))
        .await?;
    debug!(draft = %draft_id, "Reply draft sent");

    Ok(compact(json!({ "status": "sent", "draftId": draft_id, "etag": etag })))
}

pub(crate) async fn send_message(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "mail.message.send";
    let to = str_list(&args, "to");
    if to.is_empty() {
        return Err(ToolError::Validation {
            tool_name: TOOL.into(),
            errors: vec!["$.to: must contain at least one recipient".into()],
        });
    }
    let subject = args.get("subject").and_then(Value::as_str).unwrap_or_default();
    let body = args.get("body").and_then(Value::as_str).unwrap_or_default();

    let mut message = Map::new();
    message.insert("subject".into(), json!(subject));
    message.insert(
        "body".into(),
        json!({
            "contentType": opt_str(&args, "bodyContentType").unwrap_or("Text"),
            "content": body,
        }),
    );
    message.insert(
        "toRecipients".into(),
        to.iter().map(|address| json!({ "emailAddress": { "address": address } })).collect(),
    );
    if let Some(headers) = args.get("internetHeaders").and_then(Value::as_object)
        && !headers.is_empty()
    {
        let headers: Vec<Value> = headers
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        message.insert("internetMessageHeaders".into(), Value::Array(headers));
    }

    let mut attachments = Vec::new();
    for item in args.get("attachments").and_then(Value::as_array).into_iter().flatten() {
        let path = item.get("path").and_then(Value::as_str).unwrap_or_default();
        let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
        let bytes = read_file(TOOL, path).await?;
        attachments.push(json!({
            "@odata.type": "#microsoft.graph.fileAttachment",
            "name": name,
            "contentBytes": BASE64.encode(bytes),
        }));
    }
    if !attachments.is_empty() {
        message.insert("attachments".into(), Value::Array(attachments));
    }

    ctx.graph
        .send(GraphRequest::post("/me/sendMail").json(json!({
            "message": message,
            "saveToSentItems": flag(&args, "saveToSentItems", true),
        })))
        .await?;

    Ok(json!({ "status": "sent", "recipients": to.len() }))
}

pub(crate) async fn download_attachment(
    ctx: &M365Context,
    args: Value,
) -> Result<Value, ToolError> {
    const TOOL: &str = "mail.attachment.download";
    let message_id = req_str(TOOL, &args, "messageId")?;
    let attachment_id = req_str(TOOL, &args, "attachmentId")?;
    let target = req_str(TOOL, &args, "targetPath")?;

    let data = ctx
        .graph
        .send(GraphRequest::get(format!(
            "/me/messages/{}/attachments/{}",
            segment(message_id),
            segment(attachment_id)
        )))
        .await?;
    let encoded = data
        .get("contentBytes")
        .and_then(Value::as_str)
        .ok_or_else(|| failed(TOOL, "attachment content not available"))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| failed(TOOL, format!("attachment content is not base64: {e}")))?;

    if let Some(parent) = Path::new(target).parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(TOOL, format!("failed to create {}: {e}", parent.display())))?;
    }
    tokio::fs::write(target, &bytes)
        .await
        .map_err(|e| failed(TOOL, format!("failed to write {target}: {e}")))?;

    Ok(json!({ "status": "saved", "filePath": target, "size": bytes.len() }))
}

pub(crate) async fn upload_and_attach(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "mail.attachment.uploadAndAttach";
    let message_id = req_str(TOOL, &args, "messageId")?;
    let file_path = req_str(TOOL, &args, "filePath")?;
    let bytes = read_file(TOOL, file_path).await?;

    let attachment = compact(json!({
        "@odata.type": "#microsoft.graph.fileAttachment",
        "name": file_name(file_path),
        "contentType": opt_str(&args, "contentType"),
        "contentBytes": BASE64.encode(bytes),
    }));
    let path = format!("/me/messages/{}/attachments", segment(message_id));
    let data = ctx.graph.send(GraphRequest::post(path).json(attachment)).await?;

    Ok(compact(json!({ "status": "attached", "attachmentId": data.get("id") })))
}

// ---- calendar ------------------------------------------------------------

pub(crate) async fn list_events(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "calendar.events.list";
    let start = req_str(TOOL, &args, "startDateTime")?;
    let end = req_str(TOOL, &args, "endDateTime")?;
    let path = match opt_str(&args, "calendarId") {
        Some(id) if !matches!(id.to_ascii_lowercase().as_str(), "me" | "primary") => {
            format!("/me/calendars/{}/calendarview", segment(id))
        }
        _ => "/me/calendarview".to_string(),
    };

    let data = ctx
        .graph
        .send(
            GraphRequest::get(path)
                .query("startDateTime", start)
                .query("endDateTime", end)
                .query("$orderby", "start/dateTime")
                .prefer("outlook.timezone=\"UTC\""),
        )
        .await?;

    let events: Vec<Value> = data
        .get("value")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|e| {
                    compact(json!({
                        "id": e.get("id"),
                        "subject": e.get("subject"),
                        "start": e.get("start").and_then(|s| s.get("dateTime")),
                        "end": e.get("end").and_then(|s| s.get("dateTime")),
                        "location": e
                            .get("location")
                            .and_then(|l| l.get("displayName"))
                            .filter(|l| l.as_str().is_some_and(|s| !s.is_empty())),
                        "organizer": e.get("organizer").and_then(sender_address),
                        "isAllDay": e.get("isAllDay"),
                        "webLink": e.get("webLink"),
                    }))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(json!({ "events": events }))
}

pub(crate) async fn create_or_update_event(
    ctx: &M365Context,
    args: Value,
) -> Result<Value, ToolError> {
    const TOOL: &str = "calendar.event.createOrUpdate";
    let subject = req_str(TOOL, &args, "subject")?;
    let start = req_str(TOOL, &args, "start")?;
    let end = req_str(TOOL, &args, "end")?;

    let attendees: Vec<Value> = str_list(&args, "attendees")
        .into_iter()
        .map(|address| json!({ "emailAddress": { "address": address }, "type": "required" }))
        .collect();
    let payload = compact(json!({
        "subject": subject,
        "body": opt_str(&args, "body").map(|b| json!({ "contentType": "HTML", "content": b })),
        "start": { "dateTime": start, "timeZone": "UTC" },
        "end": { "dateTime": end, "timeZone": "UTC" },
        "attendees": attendees,
        "location": opt_str(&args, "location").map(|l| json!({ "displayName": l })),
    }));

    match opt_str(&args, "eventId") {
        Some(event_id) => {
            let path = format!("/me/events/{}", segment(event_id));
            ctx.graph.send(GraphRequest::patch(path).json(payload)).await?;
            Ok(json!({ "status": "updated", "eventId": event_id }))
        }
        None => {
            let created = ctx.graph.send(GraphRequest::post("/me/events").json(payload)).await?;
            Ok(compact(json!({ "status": "created", "eventId": created.get("id") })))
        }
    }
}

pub(crate) async fn cancel_event(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "calendar.event.cancel";
    let event_id = req_str(TOOL, &args, "eventId")?;
    let comment = args.get("comment").and_then(Value::as_str).unwrap_or_default();
    ctx.graph
        .send(
            GraphRequest::post(format!("/me/events/{}/cancel", segment(event_id)))
                .json(json!({ "comment": comment })),
        )
        .await?;
    Ok(json!({ "status": "cancelled", "eventId": event_id }))
}

// ---- drive ---------------------------------------------------------------

pub(crate) async fn upload_file(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "drive.file.upload";
    let source = req_str(TOOL, &args, "sourcePath")?;
    let drive_path = req_str(TOOL, &args, "drivePath")?;
    let conflict = opt_str(&args, "conflictBehavior").unwrap_or("replace");
    let bytes = read_file(TOOL, source).await?;

    let encoded: Vec<String> = drive_path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(segment)
        .collect();
    let data = ctx
        .graph
        .send(
            GraphRequest::put(format!("/me/drive/root:/{}:/content", encoded.join("/")))
                .query("@microsoft.graph.conflictBehavior", conflict)
                .bytes(bytes),
        )
        .await?;

    Ok(compact(json!({
        "status": "uploaded",
        "driveItemId": data.get("id"),
        "webUrl": data.get("webUrl"),
    })))
}

// ---- excel ---------------------------------------------------------------

fn workbook_path(drive_item_id: &str) -> String {
    format!("/me/drive/items/{}/workbook", segment(drive_item_id))
}

/// `worksheets('Name')` with the name escaped for an OData string literal.
fn worksheet(name: &str) -> String {
    format!("worksheets('{}')", segment(&name.replace('\'', "''")))
}

fn with_session(request: GraphRequest, session: Option<&str>) -> GraphRequest {
    match session {
        Some(id) => request.header("workbook-session-id", id),
        None => request,
    }
}

async fn sheet_names(
    ctx: &M365Context,
    drive_item_id: &str,
    session: Option<&str>,
) -> Result<Vec<String>, ToolError> {
    let path = format!("{}/worksheets", workbook_path(drive_item_id));
    let request = GraphRequest::get(path).query("$select", "name");
    let data = ctx.graph.send(with_session(request, session)).await?;
    Ok(data
        .get("value")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|s| s.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}

pub(crate) async fn list_sheets(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "excel.workbook.listSheets";
    let drive_item_id = req_str(TOOL, &args, "driveItemId")?;
    let session = workbook_session(args.get("workbookSession"));
    let sheets = sheet_names(ctx, drive_item_id, session.as_deref()).await?;
    Ok(json!({ "sheets": sheets }))
}

pub(crate) async fn read_range(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "excel.workbook.readRange";
    let drive_item_id = req_str(TOOL, &args, "driveItemId")?;
    let session = workbook_session(args.get("workbookSession"));
    let sheet_arg = opt_str(&args, "sheetName");
    let values_only = flag(&args, "valuesOnly", true);
    let request = range_request(sheet_arg, opt_str(&args, "range"), values_only);

    let sheet = match sheet_arg {
        Some(name) => name.to_string(),
        None => sheet_names(ctx, drive_item_id, session.as_deref())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| failed(TOOL, "workbook has no worksheets"))?,
    };
    let base = format!("{}/{}", workbook_path(drive_item_id), worksheet(&sheet));
    let endpoint = match &request.range {
        Some(range) => format!("{base}/range(address='{}')", segment(range)),
        None => format!("{base}/usedRange(valuesOnly={})", request.values_only),
    };

    let mut graph_request = with_session(GraphRequest::get(endpoint), session.as_deref());
    if flag(&args, "preferValues", false) {
        graph_request = graph_request.query("$select", "address,values");
    }
    let data = ctx.graph.send(graph_request).await?;

    let rows = data.get("values").and_then(Value::as_array).cloned().unwrap_or_default();
    let row_count = rows.len();
    let truncated = row_count > MAX_RETURNED_ROWS;
    let values: Vec<Value> = rows.into_iter().take(MAX_RETURNED_ROWS).collect();

    let mut out = json!({
        "address": data.get("address"),
        "values": values,
        "rowCount": row_count,
    });
    if truncated {
        out["truncated"] = Value::Bool(true);
    }
    Ok(compact(out))
}

pub(crate) async fn update_range(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "excel.workbook.updateRange";
    let drive_item_id = req_str(TOOL, &args, "driveItemId")?;
    let sheet = req_str(TOOL, &args, "sheetName")?;
    let range = req_str(TOOL, &args, "range")?;
    let values = args.get("values").cloned().unwrap_or(Value::Array(Vec::new()));
    let session = workbook_session(args.get("workbookSession"));
    let endpoint = format!(
        "{}/{}/range(address='{}')",
        workbook_path(drive_item_id),
        worksheet(sheet),
        segment(range)
    );

    if let Some(expected) = args.get("matchExpected").filter(|v| !v.is_null()) {
        let current = ctx
            .graph
            .send(with_session(
                GraphRequest::get(endpoint.clone()).query("$select", "values"),
                session.as_deref(),
            ))
            .await?;
        if current.get("values") != Some(expected) {
            return Err(failed(TOOL, format!("{sheet}!{range} no longer matches matchExpected")));
        }
    }

    ctx.graph
        .send(with_session(
            GraphRequest::patch(endpoint).json(json!({ "values": values })),
            session.as_deref(),
        ))
        .await?;

    Ok(json!({ "status": "updated", "modifiedRange": format!("{sheet}!{range}") }))
}

// ---- graph / tooling -----------------------------------------------------

pub(crate) async fn health_check(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    let endpoint = opt_str(&args, "pingEndpoint")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}/me", ctx.graph_base_url));
    let path = match endpoint.strip_prefix(ctx.graph_base_url.as_str()) {
        Some("") => "/".to_string(),
        Some(relative) => relative.to_string(),
        None => endpoint.clone(),
    };

    let started = Instant::now();
    let result = ctx.graph.send(GraphRequest::get(path).query("$select", "id")).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    Ok(match result {
        Ok(_) => json!({ "status": "healthy", "latencyMs": latency_ms }),
        Err(e) => json!({
            "status": "degraded",
            "latencyMs": latency_ms,
            "message": e.to_string(),
        }),
    })
}

pub(crate) async fn acquire_token(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "graph.token.acquire";
    let scopes = str_list(&args, "scopeSet");
    if scopes.is_empty() {
        return Err(ToolError::Validation {
            tool_name: TOOL.into(),
            errors: vec!["$.scopeSet: must contain at least one scope".into()],
        });
    }
    let token = ctx.tokens.acquire(&ScopeSet::new(&scopes)).await?;
    Ok(compact(json!({
        "status": "acquired",
        "expiresOn": token.expires_at.map(|t| t.to_rfc3339()),
        "source": token.source.to_string(),
    })))
}

pub(crate) async fn toggle_feature(ctx: &M365Context, args: Value) -> Result<Value, ToolError> {
    const TOOL: &str = "tooling.feature.toggle";
    let feature = req_str(TOOL, &args, "feature")?;
    let enabled = args
        .get("enabled")
        .and_then(Value::as_bool)
        .ok_or_else(|| ToolError::Validation {
            tool_name: TOOL.into(),
            errors: vec!["$.enabled: expected boolean".into()],
        })?;
    let context = args.get("context").filter(|v| !v.is_null()).cloned();
    let record = ctx.features.set(feature, enabled, context);

    let mut out = serde_json::to_value(&record).map_err(|e| failed(TOOL, e.to_string()))?;
    out["status"] = json!("updated");
    Ok(out)
}
