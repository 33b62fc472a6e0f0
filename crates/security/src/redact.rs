//! Secret redaction for anything that leaves the process: logs, error events, trace records.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::Value;

pub const MASK: &str = "***";

static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*").expect("valid regex"));
static JWT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]{4,}\.[A-Za-z0-9_-]{4,}\.[A-Za-z0-9_-]*").expect("valid regex")
});
static SECRET_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(access_token|refresh_token|client_secret|api_key|apikey|password)",
        r#"(["']?\s*[=:]\s*["']?)[^\s&"',}]+"#,
    ))
    .expect("valid regex")
});
static URI_PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.\-]*://[^\s:/@]+:)[^\s@/]+@").expect("valid regex")
});

/// Whether a JSON key or header name holds secret material.
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase().replace('-', "_");
    matches!(
        key.as_str(),
        "authorization" | "proxy_authorization" | "cookie" | "set_cookie" | "apikey" | "x_api_key"
    ) || key.ends_with("token")
        || key.ends_with("api_key")
        || key.contains("secret")
        || key.contains("password")
}

/// Mask sensitive values in place, recursing through objects and arrays.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive_key(key) {
                    if !val.is_null() {
                        *val = Value::String(MASK.into());
                    }
                } else {
                    redact_value(val);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        Value::String(s) => {
            let cleaned = redact_text(s);
            if cleaned != *s {
                *s = cleaned;
            }
        }
        _ => {}
    }
}

/// Mask bearer tokens, JWTs, URI passwords and `secret=value` pairs inside free text.
pub fn redact_text(text: &str) -> String {
    let text = URI_PASSWORD.replace_all(text, format!("${{1}}{MASK}@").as_str());
    let text = BEARER.replace_all(&text, format!("Bearer {MASK}").as_str());
    let text = JWT.replace_all(&text, MASK);
    SECRET_PARAM.replace_all(&text, format!("${{1}}${{2}}{MASK}").as_str()).into_owned()
}
