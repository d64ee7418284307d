//! Authenticated API client: bearer decoration, 401 interception and
//! single-flight token refresh.

pub(crate) mod state;

use reqwest::{Method, StatusCode, Url};
use scopeguard::ScopeGuard;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth::AuthManager;
use crate::database::Database;
use crate::error::ApiError;
use crate::events::{SessionExpired, SessionExpiredHook, LOGIN_ROUTE};
use crate::models::{CredentialPair, LoginRequest, UsernameCheck};
use state::{Admission, ClientState};

/// Конфигурация клиента (api_base_url, таймаут, app_version, каталог данных)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Fixed per-call deadline; an unresolved call fails with a transport error
    pub timeout_ms: u64,
    /// Sent in X-App-Version header for debugging version skew
    pub app_version: String,
    /// Каталог с БД учётных данных и ключом шифрования
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:18976/api".to_string(),
            timeout_ms: 5000,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from(".aviary"),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by AVIARY_API_BASE_URL, AVIARY_TIMEOUT_MS, AVIARY_DATA_DIR
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("AVIARY_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Ok(timeout) = std::env::var("AVIARY_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => config.timeout_ms = ms,
                Err(_) => warn!(
                    "[API] Ignoring invalid AVIARY_TIMEOUT_MS '{}', using {}ms",
                    timeout, config.timeout_ms
                ),
            }
        }
        if let Ok(dir) = std::env::var("AVIARY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Описание HTTP запроса, достаточное для повторной отправки
#[derive(Debug, Clone)]
pub(crate) struct RequestDescriptor {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<serde_json::Value>,
    /// false for auth endpoints: their 401 never starts a refresh
    pub(crate) refreshable: bool,
}

impl RequestDescriptor {
    pub(crate) fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
            refreshable: true,
        }
    }

    pub(crate) fn query(mut self, query: &[(&str, &str)]) -> Self {
        self.query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub(crate) fn body<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)?;
        // () сериализуется в null: запрос без тела
        self.body = if value.is_null() { None } else { Some(value) };
        Ok(self)
    }

    pub(crate) fn without_refresh(mut self) -> Self {
        self.refreshable = false;
        self
    }
}

/// Клиент API. Один экземпляр на процесс; клоны разделяют состояние.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) api_base_url: String,
    pub(crate) app_version: String,
    pub(crate) client: reqwest::Client,
    pub(crate) auth_manager: Arc<AuthManager>,
    pub(crate) state: Arc<ClientState>,
    pub(crate) on_session_expired: Option<SessionExpiredHook>,
}

impl ApiClient {
    /// Open (or create) the credential store under `config.data_dir` and build the client.
    pub fn open(config: ClientConfig) -> Result<Self, ApiError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            ApiError::Storage(format!(
                "Failed to create data directory {}: {}",
                config.data_dir.display(),
                e
            ))
        })?;
        let db_path = config.data_dir.join("aviary.db");
        let db_path_str = db_path.to_str().ok_or_else(|| {
            ApiError::Storage(format!(
                "Database path contains invalid UTF-8: {}",
                db_path.display()
            ))
        })?;
        let db = Arc::new(Database::new(db_path_str)?);
        Self::new_with_config(db, config)
    }

    pub fn new_with_config(db: Arc<Database>, config: ClientConfig) -> Result<Self, ApiError> {
        let api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        Url::parse(&api_base_url).map_err(|e| {
            ApiError::Transport(format!("Invalid api_base_url '{}': {}", api_base_url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        let auth_manager = AuthManager::new(
            api_base_url.clone(),
            config.app_version.clone(),
            config.timeout(),
            db,
        )?;
        // Default bearer берётся из хранилища при старте
        let bearer = auth_manager.stored_access_token()?;
        debug!(
            "[API] Client for {} created, stored token: {}",
            api_base_url,
            bearer.is_some()
        );
        Ok(Self {
            api_base_url,
            app_version: config.app_version,
            client,
            auth_manager: Arc::new(auth_manager),
            state: Arc::new(ClientState::new(bearer)),
            on_session_expired: None,
        })
    }

    /// Subscribe the hosting application to irrecoverable auth failures
    pub fn with_session_expired_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SessionExpired) + Send + Sync + 'static,
    {
        self.on_session_expired = Some(Arc::new(hook));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.api_base_url
    }

    /// true while a refresh call is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.state.is_refreshing()
    }

    /// Число запросов, ожидающих завершения refresh
    pub fn pending_requests(&self) -> usize {
        self.state.queue_len()
    }

    /// URL from path segments under the base URL; each segment is percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| ApiError::Transport(format!("Invalid URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("Base URL cannot be a base: {}", self.api_base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// "/parrots/12?all=true" style path; the query part is kept verbatim
    fn endpoint_for_path(&self, path: &str) -> Result<Url, ApiError> {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut url = self.endpoint(&segments)?;
        url.set_query(query);
        Ok(url)
    }

    // ============================================
    // GENERIC VERBS
    // ============================================

    /// GET `path` (relative to the base URL) with optional query pairs
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let request = RequestDescriptor::new(Method::GET, self.endpoint_for_path(path)?).query(query);
        self.call(request).await
    }

    /// POST `body` as JSON; pass `&()` for an empty body
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = RequestDescriptor::new(Method::POST, self.endpoint_for_path(path)?).body(body)?;
        self.call(request).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = RequestDescriptor::new(Method::PUT, self.endpoint_for_path(path)?).body(body)?;
        self.call(request).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = RequestDescriptor::new(Method::DELETE, self.endpoint_for_path(path)?);
        self.call(request).await
    }

    pub(crate) async fn call<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<T, ApiError> {
        let value = self.execute(request).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    // ============================================
    // AUTH
    // ============================================

    /// POST /auth/login; on success the pair is persisted and becomes the default bearer
    pub async fn login(&self, credentials: &LoginRequest) -> Result<CredentialPair, ApiError> {
        let request = RequestDescriptor::new(Method::POST, self.endpoint(&["auth", "login"])?)
            .body(credentials)?
            .without_refresh();
        let pair: CredentialPair = self.call(request).await?;
        self.auth_manager.save_credentials(&pair)?;
        self.state.begin_session(
            pair.access_token.clone(),
            &ApiError::Auth("session replaced by login".into()),
        );
        info!("[AUTH] Logged in as '{}'", pair.username);
        Ok(pair)
    }

    /// GET /auth/check?username=
    pub async fn check_username(&self, username: &str) -> Result<bool, ApiError> {
        let request = RequestDescriptor::new(Method::GET, self.endpoint(&["auth", "check"])?)
            .query(&[("username", username)])
            .without_refresh();
        let check: UsernameCheck = self.call(request).await?;
        Ok(check.exists)
    }

    /// Exchange a refresh token for a new pair over the bare transport.
    /// Does not persist the pair nor touch the refresh state.
    pub async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, ApiError> {
        self.auth_manager.refresh_token(refresh_token).await
    }

    /// Purely local: clears persisted credentials and the client state
    pub fn logout(&self) -> Result<(), ApiError> {
        self.state.reset(&ApiError::Auth("logged out".into()));
        self.auth_manager.clear_credentials()?;
        info!("[AUTH] Logged out");
        Ok(())
    }

    /// Сохранённая пара токенов, если пользователь вошёл
    pub fn credentials(&self) -> Result<Option<CredentialPair>, ApiError> {
        self.auth_manager.load_credentials()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.bearer().is_some()
    }

    // ============================================
    // PIPELINE
    // ============================================

    /// Send with the current bearer; on 401 run the refresh protocol.
    /// Every branch re-issues the request at most once.
    pub(crate) async fn execute(
        &self,
        request: RequestDescriptor,
    ) -> Result<serde_json::Value, ApiError> {
        let sent_with = self.state.bearer();
        let (status, body) = self.send(&request, sent_with.as_deref()).await?;
        if status != StatusCode::UNAUTHORIZED {
            return into_result(status, body);
        }
        if !request.refreshable {
            return Err(ApiError::Auth(unauthorized_message(&body)));
        }

        match self.state.admit(sent_with.as_deref(), &request) {
            Admission::Queued(rx) => {
                debug!(
                    "[API] 401 for {} {} while refreshing, queued",
                    request.method,
                    request.url.path()
                );
                rx.await
                    .unwrap_or_else(|_| Err(ApiError::Auth("token refresh abandoned".into())))
            }
            Admission::Retry(current) => {
                debug!("[API] 401 with a superseded token, retrying with current one");
                self.replay(&request, Some(&current)).await
            }
            Admission::SessionGone => Err(ApiError::Auth("session expired".into())),
            Admission::Lead(epoch) => {
                let token = self.refresh_and_drain(epoch).await?;
                self.replay(&request, Some(&token)).await
            }
        }
    }

    /// Single re-issue of a request; a second 401 is final.
    async fn replay(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<serde_json::Value, ApiError> {
        let (status, body) = self.send(request, token).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth(format!(
                "still unauthorized after retry: {}",
                unauthorized_message(&body)
            )));
        }
        into_result(status, body)
    }

    async fn send(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<(StatusCode, Vec<u8>), ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header("X-App-Version", &self.app_version);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        debug!(
            "[API] {} {} -> {}",
            request.method,
            request.url.path(),
            status.as_u16()
        );
        Ok((status, body))
    }

    /// Leader side of the refresh. Returns the new access token after the queue
    /// has been replayed; on failure the queue is failed and the session purged.
    async fn refresh_and_drain(&self, epoch: u64) -> Result<String, ApiError> {
        // Lead future dropped mid-refresh: release waiters and the flag
        let abandoned = scopeguard::guard((), |_| {
            let failed = self
                .state
                .fail_all_if(epoch, &ApiError::Auth("token refresh abandoned".into()));
            warn!(
                "[API] Token refresh abandoned, {} queued requests failed",
                failed
            );
        });

        let result = match self.refresh_credentials(epoch).await {
            Ok(token) => {
                self.drain_queue(&token).await;
                Ok(token)
            }
            Err(e) => {
                // Сначала bearer и хранилище, флаг refreshing снимается последним:
                // запрос без токена не должен начать refresh со старым refresh token
                if self.state.clear_bearer_if(epoch) {
                    self.expire_session(&e.to_string());
                }
                let failed = self.state.fail_all_if(epoch, &e);
                if failed > 0 {
                    warn!("[API] {} queued requests failed: {}", failed, e);
                }
                Err(e)
            }
        };
        ScopeGuard::into_inner(abandoned);
        result
    }

    async fn refresh_credentials(&self, epoch: u64) -> Result<String, ApiError> {
        let refresh_token = match self.auth_manager.stored_refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!("[API] Token expired (401) but no refresh token available");
                return Err(ApiError::Auth("unauthenticated: no refresh token".into()));
            }
            Err(e) => {
                return Err(ApiError::Auth(format!("refresh token unavailable: {}", e)));
            }
        };

        info!("[API] Token expired (401), refreshing");
        let pair = self
            .auth_manager
            .refresh_token(&refresh_token)
            .await
            .map_err(|e| ApiError::Auth(format!("token refresh failed: {}", e)))?;

        if !self.state.install_bearer(epoch, pair.access_token.clone()) {
            return Err(ApiError::Auth("session ended during token refresh".into()));
        }
        if let Err(e) = self.auth_manager.save_credentials(&pair) {
            // токен уже получен: работаем с ним, но следующий запуск начнёт без него
            error!("[API] Failed to persist refreshed credentials: {}", e);
        }
        info!(
            "[API] Token refreshed, new access token length: {}",
            pair.access_token.len()
        );
        Ok(pair.access_token)
    }

    /// Replay queued requests in arrival order until the queue stays empty.
    /// Sends start in order; completions may race.
    async fn drain_queue(&self, token: &str) {
        while let Some(batch) = self.state.take_queue_or_finish() {
            debug!("[API] Replaying {} queued requests", batch.len());
            let replays = batch.into_iter().map(|pending| async move {
                let result = self.replay(&pending.request, Some(token)).await;
                let _ = pending.done.send(result);
            });
            futures::future::join_all(replays).await;
        }
    }

    fn expire_session(&self, reason: &str) {
        if let Err(e) = self.auth_manager.clear_credentials() {
            error!("[API] Failed to purge credentials: {}", e);
        }
        warn!("[API] Session expired ({}), redirecting to {}", reason, LOGIN_ROUTE);
        if let Some(hook) = &self.on_session_expired {
            hook(&SessionExpired {
                route: LOGIN_ROUTE,
                reason: reason.to_string(),
            });
        }
    }
}

fn into_result(status: StatusCode, body: Vec<u8>) -> Result<serde_json::Value, ApiError> {
    if status.is_success() {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        return serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()));
    }
    let text = String::from_utf8_lossy(&body).into_owned();
    let body = if text.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        text
    };
    Err(ApiError::Http {
        status: status.as_u16(),
        body,
    })
}

fn unauthorized_message(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.trim().is_empty() {
        "unauthorized".to_string()
    } else {
        text.into_owned()
    }
}
