//! Bearer-token acquisition and caching for tool backends.
//!
//! Resolution order for [`TokenManager::acquire`], first match wins:
//!
//! 1. a statically injected token,
//! 2. a pre-provisioned token (config or environment),
//! 3. a cached token for the scope-set that is outside its safety margin,
//! 4. each configured [`CredentialSource`] in turn (CLI delegate, then
//!    client-credentials exchange).
//!
//! Refreshes are single-flight per scope-set: concurrent callers share one
//! in-flight future and observe the same outcome.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use toolwright_config::CredentialsConfig;
use toolwright_core::CredentialError;
use tracing::{debug, info, warn};

use crate::redact::redact_text;

/// Lifetime assumed for CLI tokens that carry no readable `exp` claim.
const CLI_DEFAULT_TTL_SECS: i64 = 10 * 60;
/// `expires_in` assumed when the token endpoint omits it.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3_600;
/// Subtracted from `expires_in`, floored at the same value.
const EXCHANGE_SKEW_SECS: i64 = 60;
const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// A normalized, order-independent set of OAuth scopes. Cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            scopes
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-separated, as OAuth expects.
    pub fn joined(&self) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

/// Where a token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Static,
    Provisioned,
    Cli,
    ClientCredentials,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Static => "static",
            Self::Provisioned => "provisioned",
            Self::Cli => "cli",
            Self::ClientCredentials => "client_credentials",
        };
        f.write_str(name)
    }
}

/// A freshly minted or cached bearer token.
#[derive(Clone)]
pub struct CachedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub source: TokenSource,
}

impl CachedCredential {
    /// Usable when `now` is before `expires_at - margin`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now < self.expires_at - margin
    }
}

impl std::fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCredential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("source", &self.source)
            .finish()
    }
}

/// What [`TokenManager::acquire`] hands back. Static tokens may have no known expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: TokenSource,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("source", &self.source)
            .finish()
    }
}

impl From<CachedCredential> for AccessToken {
    fn from(c: CachedCredential) -> Self {
        Self {
            token: c.token,
            expires_at: Some(c.expires_at),
            source: c.source,
        }
    }
}

/// A way of minting a token that needs no interactive login.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn kind(&self) -> TokenSource;

    /// Prerequisites this source lacks. Empty means it can be tried.
    fn missing(&self) -> Vec<String>;

    /// Opportunistic sources only log their failures; the caller sees them
    /// only when no other source was tried or left unconfigured.
    fn is_opportunistic(&self) -> bool {
        false
    }

    async fn fetch(&self, scopes: &ScopeSet) -> Result<CachedCredential, CredentialError>;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<CachedCredential, CredentialError>>>;

/// Shared token cache with single-flight refresh.
pub struct TokenManager {
    static_token: Option<String>,
    provisioned: Option<String>,
    sources: Arc<Vec<Arc<dyn CredentialSource>>>,
    safety_margin: chrono::Duration,
    cache: Arc<Mutex<HashMap<ScopeSet, CachedCredential>>>,
    inflight: Arc<Mutex<HashMap<ScopeSet, RefreshFuture>>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("static_token", &self.static_token.as_ref().map(|_| "[REDACTED]"))
            .field("provisioned", &self.provisioned.as_ref().map(|_| "[REDACTED]"))
            .field("sources", &self.sources.iter().map(|s| s.kind()).collect::<Vec<_>>())
            .field("safety_margin", &self.safety_margin)
            .finish()
    }
}

impl TokenManager {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            static_token: None,
            provisioned: None,
            sources: Arc::new(Vec::new()),
            safety_margin: chrono::Duration::from_std(safety_margin)
                .unwrap_or(chrono::Duration::seconds(60)),
            cache: Arc::new(Mutex::new(HashMap::new())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build from configuration: provisioned token, CLI delegate, client credentials.
    pub fn from_config(config: &CredentialsConfig) -> Self {
        let mut sources: Vec<Arc<dyn CredentialSource>> = Vec::new();
        if !config.cli_disabled {
            sources.push(Arc::new(CliSource::from_config(config)));
        }
        sources.push(Arc::new(ClientCredentialsSource::from_config(config)));

        let mut manager = Self::new(Duration::from_secs(config.safety_margin_secs));
        manager.provisioned = config.access_token.clone().filter(|t| !t.trim().is_empty());
        manager.sources = Arc::new(sources);
        manager
    }

    /// Always answer with `token` (tests, fixed deployments).
    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.static_token = Some(token.into());
        self
    }

    pub fn with_provisioned_token(mut self, token: impl Into<String>) -> Self {
        self.provisioned = Some(token.into());
        self
    }

    pub fn with_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        let mut sources: Vec<_> = self.sources.iter().cloned().collect();
        sources.push(source);
        self.sources = Arc::new(sources);
        self
    }

    /// Put a credential into the cache, e.g. one obtained out of band.
    pub fn prime(&self, scopes: &ScopeSet, credential: CachedCredential) {
        lock(&self.cache).insert(scopes.clone(), credential);
    }

    /// Kinds of sources that could currently be tried, plus what the rest lack.
    pub fn source_status(&self) -> Vec<(TokenSource, Vec<String>)> {
        let mut status = Vec::new();
        if self.static_token.is_some() {
            status.push((TokenSource::Static, Vec::new()));
        }
        if self.provisioned.is_some() {
            status.push((TokenSource::Provisioned, Vec::new()));
        }
        status.extend(self.sources.iter().map(|s| (s.kind(), s.missing())));
        status
    }

    pub async fn get_token(&self, scopes: &ScopeSet) -> Result<String, CredentialError> {
        self.acquire(scopes).await.map(|t| t.token)
    }

    pub async fn acquire(&self, scopes: &ScopeSet) -> Result<AccessToken, CredentialError> {
        if let Some(token) = &self.static_token {
            return Ok(AccessToken {
                token: token.clone(),
                expires_at: jwt_expiry(token),
                source: TokenSource::Static,
            });
        }
        if let Some(token) = &self.provisioned {
            return Ok(AccessToken {
                token: token.clone(),
                expires_at: jwt_expiry(token),
                source: TokenSource::Provisioned,
            });
        }
        if let Some(cached) = self.cached(scopes) {
            return Ok(cached.into());
        }

        let refresh = {
            let mut inflight = lock(&self.inflight);
            // A refresh may have finished between the cache check and taking this lock.
            if let Some(cached) = self.cached(scopes) {
                return Ok(cached.into());
            }
            match inflight.get(scopes) {
                Some(existing) => existing.clone(),
                None => {
                    let fut = self.refresh(scopes.clone()).boxed().shared();
                    inflight.insert(scopes.clone(), fut.clone());
                    fut
                }
            }
        };

        refresh.await.map(Into::into)
    }

    fn cached(&self, scopes: &ScopeSet) -> Option<CachedCredential> {
        let cache = lock(&self.cache);
        cache
            .get(scopes)
            .filter(|c| c.is_fresh(Utc::now(), self.safety_margin))
            .cloned()
    }

    fn refresh(
        &self,
        scopes: ScopeSet,
    ) -> impl Future<Output = Result<CachedCredential, CredentialError>> + Send + 'static {
        let sources = Arc::clone(&self.sources);
        let cache = Arc::clone(&self.cache);
        let inflight = Arc::clone(&self.inflight);
        let margin = self.safety_margin;

        async move {
            let result = fetch_from_sources(&sources, &scopes).await;
            match &result {
                Ok(credential) => {
                    info!(
                        source = %credential.source,
                        fingerprint = %fingerprint(&credential.token),
                        expires_at = %credential.expires_at,
                        "Credential acquired"
                    );
                    if credential.is_fresh(Utc::now(), margin) {
                        lock(&cache).insert(scopes.clone(), credential.clone());
                    } else {
                        warn!(
                            source = %credential.source,
                            "Credential expires within the safety margin; not cached"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "Credential acquisition failed"),
            }
            lock(&inflight).remove(&scopes);
            result
        }
    }
}

async fn fetch_from_sources(
    sources: &[Arc<dyn CredentialSource>],
    scopes: &ScopeSet,
) -> Result<CachedCredential, CredentialError> {
    let mut missing = Vec::new();
    let mut last_error = None;
    let mut opportunistic_error = None;

    for source in sources {
        let lacks = source.missing();
        if !lacks.is_empty() {
            debug!(source = %source.kind(), missing = ?lacks, "Credential source skipped");
            missing.extend(lacks);
            continue;
        }
        match source.fetch(scopes).await {
            Ok(credential) => return Ok(credential),
            Err(e) if source.is_opportunistic() => {
                debug!(
                    source = %source.kind(),
                    error = %e,
                    "Credential source unavailable, trying next"
                );
                opportunistic_error = Some(e);
            }
            Err(e) => {
                debug!(
                    source = %source.kind(),
                    error = %e,
                    "Credential source failed, trying next"
                );
                last_error = Some(e);
            }
        }
    }

    if let Some(e) = last_error {
        return Err(e);
    }
    if missing.is_empty() {
        if let Some(e) = opportunistic_error {
            return Err(e);
        }
        missing.push("access_token".into());
    }
    Err(CredentialError::NotConfigured { missing })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Read the `exp` claim of a JWT without verifying it.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// Short, non-reversible identifier for log lines.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

// --- Sources ---

/// Delegates to a locally signed-in CLI (`m365 util accesstoken get`).
#[derive(Debug, Clone)]
pub struct CliSource {
    pub bin: String,
    pub resource: String,
    pub timeout: Duration,
}

impl CliSource {
    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self {
            bin: config.cli_bin.clone(),
            resource: config.resource.clone(),
            timeout: Duration::from_millis(config.cli_timeout_ms),
        }
    }
}

#[async_trait]
impl CredentialSource for CliSource {
    fn kind(&self) -> TokenSource {
        TokenSource::Cli
    }

    fn is_opportunistic(&self) -> bool {
        true
    }

    fn missing(&self) -> Vec<String> {
        if self.bin.trim().is_empty() {
            vec!["cli_bin".into()]
        } else {
            Vec::new()
        }
    }

    async fn fetch(&self, _scopes: &ScopeSet) -> Result<CachedCredential, CredentialError> {
        let mut command = tokio::process::Command::new(&self.bin);
        command
            .args(["util", "accesstoken", "get", "--resource", &self.resource, "--output", "text"])
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CredentialError::Timeout {
                source_name: self.bin.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| CredentialError::Cli(format!("{}: {e}", self.bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::Cli(format!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                redact_text(stderr.trim())
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().trim_matches('"').to_string();
        if token.is_empty() {
            return Err(CredentialError::Cli(format!("{} returned no token", self.bin)));
        }

        let expires_at = jwt_expiry(&token)
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(CLI_DEFAULT_TTL_SECS));
        Ok(CachedCredential {
            token,
            expires_at,
            source: TokenSource::Cli,
        })
    }
}

/// OAuth 2.0 client-credentials grant against the tenant's token endpoint.
#[derive(Clone)]
pub struct ClientCredentialsSource {
    client: reqwest::Client,
    authority: String,
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    default_scope: Option<String>,
}

impl std::fmt::Debug for ClientCredentialsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsSource")
            .field("authority", &self.authority)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl ClientCredentialsSource {
    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            authority: config.authority.trim_end_matches('/').to_string(),
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            default_scope: config.default_scope.clone(),
        }
    }

    fn token_url(&self, tenant: &str) -> String {
        format!("{}/{tenant}/oauth2/v2.0/token", self.authority)
    }

    fn scope_for(&self, scopes: &ScopeSet) -> String {
        if !scopes.is_empty() {
            return scopes.joined();
        }
        self.default_scope.clone().unwrap_or_else(|| DEFAULT_GRAPH_SCOPE.into())
    }
}

#[async_trait]
impl CredentialSource for ClientCredentialsSource {
    fn kind(&self) -> TokenSource {
        TokenSource::ClientCredentials
    }

    fn missing(&self) -> Vec<String> {
        [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
        .map(|(name, _)| name.to_string())
        .collect()
    }

    async fn fetch(&self, scopes: &ScopeSet) -> Result<CachedCredential, CredentialError> {
        let (Some(tenant), Some(client_id), Some(secret)) =
            (&self.tenant_id, &self.client_id, &self.client_secret)
        else {
            return Err(CredentialError::NotConfigured { missing: self.missing() });
        };

        let scope = self.scope_for(scopes);
        let form = [
            ("client_id", client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("scope", scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .client
            .post(self.token_url(tenant))
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Network(redact_text(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CredentialError::Exchange {
                status: status.as_u16(),
                message: redact_text(text.trim()),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Network(format!("invalid token response: {e}")))?;

        let expires_in = body
            .expires_in
            .as_ref()
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let lifetime = (expires_in - EXCHANGE_SKEW_SECS).max(EXCHANGE_SKEW_SECS);

        Ok(CachedCredential {
            token: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
            source: TokenSource::ClientCredentials,
        })
    }
}
