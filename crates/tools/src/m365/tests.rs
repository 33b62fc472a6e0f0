use std::sync::Mutex;
use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use toolwright_core::error::UpstreamError;
use toolwright_core::tool::ToolCallRequest;

use super::*;

type Responder = Box<dyn Fn(&GraphRequest) -> Result<Value, ToolError> + Send + Sync>;

/// Records every request and answers from a closure.
struct RecordingBackend {
    requests: Mutex<Vec<GraphRequest>>,
    respond: Responder,
}

impl RecordingBackend {
    fn new(
        respond: impl Fn(&GraphRequest) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn requests(&self) -> Vec<GraphRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphBackend for RecordingBackend {
    async fn send(&self, request: GraphRequest) -> Result<Value, ToolError> {
        let response = (self.respond)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

fn context(backend: Arc<RecordingBackend>) -> Arc<M365Context> {
    let tokens =
        Arc::new(TokenManager::new(Duration::from_secs(60)).with_static_token("static-token"));
    Arc::new(M365Context::new(backend, tokens))
}

fn dispatcher_with(backend: Arc<RecordingBackend>) -> Dispatcher {
    dispatcher(context(backend)).unwrap()
}

async fn call(d: &Dispatcher, name: &str, args: Value) -> Result<Value, ToolError> {
    d.call_tool(ToolCallRequest::new(name, args)).await
}

const SESSION: &str = "12345678-1234-1234-1234-1234567890ab";

#[test]
fn handlers_cover_the_manifest() {
    let backend = RecordingBackend::new(|_| Ok(Value::Null));
    let d = dispatcher_with(backend);
    assert_eq!(d.len(), 16);
    for op in M365Op::ALL {
        assert!(d.contains(op.tool_name()), "{}", op.tool_name());
    }
}

#[tokio::test]
async fn latest_message_normalizes_sender() {
    let backend = RecordingBackend::new(|_| {
        Ok(json!({"value": [{
            "id": "123",
            "subject": "Test",
            "receivedDateTime": "2024-12-01T10:00:00Z",
            "from": {"emailAddress": {"address": "sender@example.com"}},
            "webLink": "https://outlook.office.com/foo",
            "bodyPreview": "Hello"
        }]}))
    });
    let d = dispatcher_with(backend.clone());
    let args = json!({"folderId": "Inbox", "includeBodyPreview": true});
    let out = call(&d, "mail.latestMessage.get", args).await.unwrap();
    assert_eq!(
        out,
        json!({
            "messageId": "123",
            "subject": "Test",
            "receivedDateTime": "2024-12-01T10:00:00Z",
            "from": "sender@example.com",
            "webLink": "https://outlook.office.com/foo",
            "bodyPreview": "Hello"
        })
    );
    let req = &backend.requests()[0];
    assert_eq!(req.path, "/me/mailFolders/Inbox/messages");
    assert!(req.query.contains(&("$top".into(), "1".into())));
    let select = req.query.iter().find(|(k, _)| k == "$select").unwrap();
    assert!(select.1.ends_with("bodyPreview"));
}

#[tokio::test]
async fn latest_message_in_empty_folder() {
    let backend = RecordingBackend::new(|_| Ok(json!({"value": []})));
    let d = dispatcher_with(backend);
    let out = call(&d, "mail.latestMessage.get", json!({"folderId": "archive"})).await.unwrap();
    assert!(out["message"].as_str().unwrap().contains("archive"));
}

#[tokio::test]
async fn fetch_message_strips_attachment_bytes() {
    let backend = RecordingBackend::new(|_| {
        Ok(json!({
            "id": "m1",
            "subject": "Rechnung",
            "body": {"contentType": "text", "content": "Hallo"},
            "attachments": [{"id": "a1", "name": "r.pdf", "size": 10, "contentBytes": "AAAA"}]
        }))
    });
    let d = dispatcher_with(backend.clone());
    let out = call(&d, "mail.message.fetch", json!({"messageId": "m1", "expandAttachments": true}))
        .await
        .unwrap();
    assert_eq!(out["body"], "Hallo");
    assert_eq!(out["attachments"][0], json!({"id": "a1", "name": "r.pdf", "size": 10}));
    let req = &backend.requests()[0];
    assert_eq!(req.prefer, vec!["outlook.body-content-type=\"text\"".to_string()]);
    assert!(req.query.contains(&("$expand".into(), "attachments".into())));
}

#[tokio::test]
async fn reply_draft_creates_patches_and_sends() {
    let backend = RecordingBackend::new(|req| {
        Ok(match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/me/messages/abc/createReply") => json!({
                "id": "draft-1",
                "@odata.etag": "etag-1"
            }),
            ("PATCH", "/me/messages/draft-1") => json!({"@odata.etag": "etag-2"}),
            _ => Value::Null,
        })
    });
    let d = dispatcher_with(backend.clone());
    let out = call(
        &d,
        "mail.message.replyDraft",
        json!({
            "messageId": "abc",
            "body": "Antwortinhalt",
            "preferHeaders": ["return=representation"],
            "saveToSentItems": false
        }),
    )
    .await
    .unwrap();
    assert_eq!(out, json!({"status": "sent", "draftId": "draft-1", "etag": "etag-2"}));

    let requests = backend.requests();
    let steps: Vec<_> = requests.iter().map(|r| (r.method.clone(), r.path.clone())).collect();
    assert_eq!(
        steps,
        vec![
            (Method::POST, "/me/messages/abc/createReply".to_string()),
            (Method::PATCH, "/me/messages/draft-1".to_string()),
            (Method::POST, "/me/messages/draft-1/send".to_string()),
        ]
    );
    assert_eq!(requests[1].header_value("if-match"), Some("etag-1"));
    assert_eq!(
        requests[1].body,
        GraphBody::Json(json!({"body": {"contentType": "Text", "content": "Antwortinhalt"}}))
    );
    assert!(requests.iter().all(|r| r.prefer == vec!["return=representation".to_string()]));
}

#[tokio::test]
async fn reply_draft_without_draft_id_fails() {
    let backend = RecordingBackend::new(|_| Ok(json!({})));
    let d = dispatcher_with(backend.clone());
    let err = call(&d, "mail.message.replyDraft", json!({"messageId": "abc", "body": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn send_message_inlines_attachments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.txt");
    std::fs::write(&path, b"hello").unwrap();

    let backend = RecordingBackend::new(|_| Ok(Value::Null));
    let d = dispatcher_with(backend.clone());
    let out = call(
        &d,
        "mail.message.send",
        json!({
            "subject": "Hi",
            "body": "Text",
            "to": ["a@example.com", "b@example.com"],
            "internetHeaders": {"X-Claim": "42"},
            "attachments": [{"name": "note.txt", "path": path.to_str().unwrap()}]
        }),
    )
    .await
    .unwrap();
    assert_eq!(out["status"], "sent");
    assert_eq!(out["recipients"], 2);

    let req = &backend.requests()[0];
    assert_eq!(req.path, "/me/sendMail");
    let GraphBody::Json(body) = &req.body else { panic!("expected json body") };
    assert_eq!(body["saveToSentItems"], true);
    assert_eq!(body["message"]["toRecipients"][1]["emailAddress"]["address"], "b@example.com");
    assert_eq!(
        body["message"]["internetMessageHeaders"][0],
        json!({"name": "X-Claim", "value": "42"})
    );
    assert_eq!(body["message"]["attachments"][0]["contentBytes"], "aGVsbG8=");
}

#[tokio::test]
async fn send_message_rejects_empty_recipients() {
    let backend = RecordingBackend::new(|_| Ok(Value::Null));
    let d = dispatcher_with(backend.clone());
    let err = call(&d, "mail.message.send", json!({"subject": "Hi", "body": "x", "to": []}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Validation { .. }));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn download_attachment_writes_decoded_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/out.bin");
    let backend = RecordingBackend::new(|_| Ok(json!({"contentBytes": "aGVsbG8="})));
    let d = dispatcher_with(backend);
    let out = call(
        &d,
        "mail.attachment.download",
        json!({"messageId": "m", "attachmentId": "a", "targetPath": target.to_str().unwrap()}),
    )
    .await
    .unwrap();
    assert_eq!(out["status"], "saved");
    assert_eq!(out["size"], 5);
    assert_eq!(std::fs::read(&target).unwrap(), b"hello");
}

#[tokio::test]
async fn calendar_create_and_update() {
    let backend = RecordingBackend::new(|req| {
        Ok(if req.method == Method::POST { json!({"id": "ev-9"}) } else { Value::Null })
    });
    let d = dispatcher_with(backend.clone());
    let created = call(
        &d,
        "calendar.event.createOrUpdate",
        json!({
            "subject": "Sync",
            "start": "2025-01-01T10:00:00",
            "end": "2025-01-01T11:00:00",
            "attendees": ["x@y.de"]
        }),
    )
    .await
    .unwrap();
    assert_eq!(created, json!({"status": "created", "eventId": "ev-9"}));

    let updated = call(
        &d,
        "calendar.event.createOrUpdate",
        json!({
            "eventId": "ev-9",
            "subject": "Sync",
            "start": "2025-01-01T10:00:00",
            "end": "2025-01-01T12:00:00"
        }),
    )
    .await
    .unwrap();
    assert_eq!(updated, json!({"status": "updated", "eventId": "ev-9"}));

    let requests = backend.requests();
    let GraphBody::Json(body) = &requests[0].body else { panic!("expected json body") };
    assert_eq!(body["start"], json!({"dateTime": "2025-01-01T10:00:00", "timeZone": "UTC"}));
    assert_eq!(body["attendees"][0]["type"], "required");
    assert!(body.get("location").is_none());
    assert_eq!(requests[1].method, Method::PATCH);
    assert_eq!(requests[1].path, "/me/events/ev-9");
}

#[tokio::test]
async fn list_events_returns_compact_events() {
    let backend = RecordingBackend::new(|_| {
        Ok(json!({"value": [{
            "id": "e1",
            "subject": "Standup",
            "start": {"dateTime": "2025-01-01T09:00:00", "timeZone": "UTC"},
            "end": {"dateTime": "2025-01-01T09:15:00", "timeZone": "UTC"},
            "location": {"displayName": ""},
            "body": {"content": "<html>very large</html>"}
        }]}))
    });
    let d = dispatcher_with(backend.clone());
    let out = call(
        &d,
        "calendar.events.list",
        json!({
            "startDateTime": "2025-01-01T00:00:00Z",
            "endDateTime": "2025-01-02T00:00:00Z",
            "calendarId": "primary"
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        out["events"][0],
        json!({
            "id": "e1",
            "subject": "Standup",
            "start": "2025-01-01T09:00:00",
            "end": "2025-01-01T09:15:00"
        })
    );
    assert_eq!(backend.requests()[0].path, "/me/calendarview");
}

#[tokio::test]
async fn read_range_drops_placeholder_session_and_uses_used_range() {
    let backend = RecordingBackend::new(|_| {
        Ok(json!({"address": "Tabelle1!A1:B2", "values": [["A", "B"], ["C", "D"]]}))
    });
    let d = dispatcher_with(backend.clone());
    let out = call(
        &d,
        "excel.workbook.readRange",
        json!({
            "driveItemId": "drive-1",
            "workbookSession": "default",
            "sheetName": "Tabelle1",
            "range": "A:B"
        }),
    )
    .await
    .unwrap();
    assert_eq!(out["address"], "Tabelle1!A1:B2");
    assert_eq!(out["rowCount"], 2);
    assert!(out.get("truncated").is_none());

    let req = &backend.requests()[0];
    assert_eq!(
        req.path,
        "/me/drive/items/drive-1/workbook/worksheets('Tabelle1')/usedRange(valuesOnly=true)"
    );
    assert_eq!(req.header_value("workbook-session-id"), None);
}

#[tokio::test]
async fn read_range_keeps_real_session_and_caps_rows() {
    let rows: Vec<Value> = (0..250).map(|i| json!([i])).collect();
    let backend =
        RecordingBackend::new(move |_| Ok(json!({"address": "S!A1:A250", "values": rows.clone()})));
    let d = dispatcher_with(backend.clone());
    let out = call(
        &d,
        "excel.workbook.readRange",
        json!({
            "driveItemId": "drive-1",
            "workbookSession": SESSION,
            "sheetName": "S",
            "range": "A1:A250"
        }),
    )
    .await
    .unwrap();
    assert_eq!(out["values"].as_array().unwrap().len(), MAX_RETURNED_ROWS);
    assert_eq!(out["rowCount"], 250);
    assert_eq!(out["truncated"], true);

    let req = &backend.requests()[0];
    assert!(req.path.ends_with("/worksheets('S')/range(address='A1:A250')"));
    assert_eq!(req.header_value("workbook-session-id"), Some(SESSION));
}

#[tokio::test]
async fn read_range_without_sheet_uses_first_sheet() {
    let backend = RecordingBackend::new(|req| {
        Ok(if req.path.ends_with("/worksheets") {
            json!({"value": [{"name": "Erstes"}, {"name": "Zweites"}]})
        } else {
            json!({"address": "Erstes!B1:C200", "values": []})
        })
    });
    let d = dispatcher_with(backend.clone());
    call(&d, "excel.workbook.readRange", json!({"driveItemId": "d", "range": "b:c"}))
        .await
        .unwrap();
    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].path.ends_with("/worksheets('Erstes')/range(address='B1:C200')"));
}

#[tokio::test]
async fn update_range_checks_expected_values() {
    let backend = RecordingBackend::new(|req| {
        Ok(if req.method == Method::GET { json!({"values": [["alt"]]}) } else { Value::Null })
    });
    let d = dispatcher_with(backend.clone());
    let err = call(
        &d,
        "excel.workbook.updateRange",
        json!({
            "driveItemId": "d",
            "sheetName": "S",
            "range": "A1",
            "values": [["neu"]],
            "matchExpected": [["anders"]]
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    assert_eq!(backend.requests().len(), 1);

    let out = call(
        &d,
        "excel.workbook.updateRange",
        json!({
            "driveItemId": "d",
            "sheetName": "S",
            "range": "A1",
            "values": [["neu"]],
            "matchExpected": [["alt"]]
        }),
    )
    .await
    .unwrap();
    assert_eq!(out, json!({"status": "updated", "modifiedRange": "S!A1"}));
    assert_eq!(backend.requests().last().unwrap().method, Method::PATCH);
}

#[tokio::test]
async fn health_check_reports_degraded_on_upstream_failure() {
    let backend = RecordingBackend::new(|req| {
        let message = "InvalidAuthenticationToken";
        Err(UpstreamError::new(req.method.as_str(), &req.path, Some(401), message).into())
    });
    let d = dispatcher_with(backend.clone());
    let out = call(&d, "graph.health.check", json!({})).await.unwrap();
    assert_eq!(out["status"], "degraded");
    assert!(out["message"].as_str().unwrap().contains("401"));
    assert_eq!(backend.requests()[0].path, "/me");
}

#[tokio::test]
async fn token_acquire_never_returns_the_token() {
    let backend = RecordingBackend::new(|_| Ok(Value::Null));
    let d = dispatcher_with(backend);
    let out = call(&d, "graph.token.acquire", json!({"scopeSet": ["Mail.Read"]})).await.unwrap();
    assert_eq!(out["status"], "acquired");
    assert_eq!(out["source"], "static");
    assert!(!out.to_string().contains("static-token"));

    let err = call(&d, "graph.token.acquire", json!({"scopeSet": []})).await.unwrap_err();
    assert!(matches!(err, ToolError::Validation { .. }));
}

#[tokio::test]
async fn feature_toggle_updates_store() {
    let backend = RecordingBackend::new(|_| Ok(Value::Null));
    let ctx = context(backend);
    let d = dispatcher(Arc::clone(&ctx)).unwrap();
    let args = json!({"feature": "cli-fallback", "enabled": true});
    let out = call(&d, "tooling.feature.toggle", args).await.unwrap();
    assert_eq!(out["status"], "updated");
    assert_eq!(out["feature"], "cli-fallback");
    assert!(out["updatedAt"].is_string());
    assert!(ctx.features.is_enabled("cli-fallback"));
}
