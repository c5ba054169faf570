//! Сессионный HTTP-клиент панели: один cookie на весь процесс, повторный
//! вход при 401 и ограниченные повторы сетевых ошибок.

use super::error::PanelError;
use super::models::Envelope;
use crate::config::PanelConfig;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone)]
struct Session {
    cookie: String,
    expires_at: Instant,
    generation: u64,
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    attempts: u32,
    wait: Duration,
    max_wait: Duration,
}

impl RetryPolicy {
    /// Пауза перед попыткой `attempt + 1`: растёт вдвое, но не выше потолка.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.wait.saturating_mul(factor).min(self.max_wait)
    }
}

enum CallFailure {
    Unauthorized,
    Panel(PanelError),
}

impl From<PanelError> for CallFailure {
    fn from(error: PanelError) -> Self {
        Self::Panel(error)
    }
}

pub struct PanelClient {
    http: reqwest::Client,
    base_url: String,
    inbounds_path: String,
    username: String,
    password: String,
    retry: RetryPolicy,
    session_ttl: Duration,
    session: RwLock<Option<Session>>,
    /// Не даёт нескольким запросам логиниться одновременно.
    login_lock: Mutex<()>,
    generation: AtomicU64,
}

impl PanelClient {
    pub fn new(config: &PanelConfig) -> Result<Self, PanelError> {
        if config.accept_invalid_certs {
            tracing::warn!(
                base_url = %config.base_url,
                "TLS certificate validation is disabled for the panel"
            );
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            inbounds_path: format!("/{}", config.inbounds_path.trim_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
            retry: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                wait: config.retry_wait(),
                max_wait: config.retry_max_wait(),
            },
            session_ttl: config.session_ttl(),
            session: RwLock::new(None),
            login_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn inbounds_path(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            self.inbounds_path.clone()
        } else {
            format!("{}/{}", self.inbounds_path, suffix.trim_start_matches('/'))
        }
    }

    /// Проверяет, что есть действующая сессия, и при необходимости логинится.
    pub async fn ensure_session(&self) -> Result<(), PanelError> {
        self.current_session().await.map(|_| ())
    }

    async fn current_session(&self) -> Result<Session, PanelError> {
        if let Some(session) = self.cached_session().await {
            return Ok(session);
        }

        let _guard = self.login_lock.lock().await;
        // Пока ждали блокировку, сессию мог обновить другой запрос.
        if let Some(session) = self.cached_session().await {
            return Ok(session);
        }

        let session = self.login().await?;
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn cached_session(&self) -> Option<Session> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|session| session.expires_at > Instant::now())
            .cloned()
    }

    /// Сбрасывает сессию, только если её ещё никто не заменил.
    async fn invalidate(&self, stale: &Session) {
        let mut guard = self.session.write().await;
        if guard
            .as_ref()
            .is_some_and(|current| current.generation == stale.generation)
        {
            *guard = None;
        }
    }

    async fn login(&self) -> Result<Session, PanelError> {
        let url = format!("{}/login", self.base_url);
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });
        tracing::debug!(url = %url, "Logging in to panel");

        let response = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        let status = response.status();
        let cookie = session_cookie(&response);
        let text = response.text().await?;

        if !status.is_success() {
            return Err(PanelError::Authentication(format!(
                "статус {}: {}",
                status.as_u16(),
                text
            )));
        }
        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|error| PanelError::Authentication(format!("ответ не JSON: {error}")))?;
        if !envelope.success {
            return Err(PanelError::Authentication(envelope.msg));
        }
        let Some(cookie) = cookie else {
            return Err(PanelError::Authentication(
                "панель не вернула cookie сессии".to_string(),
            ));
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "Panel session established");
        Ok(Session {
            cookie,
            expires_at: Instant::now() + self.session_ttl,
            generation,
        })
    }

    /// Один авторизованный запрос. При 401 сессия сбрасывается, и запрос
    /// повторяется ровно один раз после нового входа.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, PanelError> {
        let session = self.current_session().await?;
        match self.call_once(&method, path, body, &session).await {
            Ok(obj) => Ok(obj),
            Err(CallFailure::Panel(error)) => Err(error),
            Err(CallFailure::Unauthorized) => {
                tracing::info!(path, "Panel rejected session, logging in again");
                self.invalidate(&session).await;
                let session = self.current_session().await?;
                match self.call_once(&method, path, body, &session).await {
                    Ok(obj) => Ok(obj),
                    Err(CallFailure::Panel(error)) => Err(error),
                    Err(CallFailure::Unauthorized) => {
                        self.invalidate(&session).await;
                        Err(PanelError::Authentication(
                            "панель отклонила запрос после повторного входа".to_string(),
                        ))
                    }
                }
            }
        }
    }

    async fn call_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        session: &Session,
    ) -> Result<serde_json::Value, CallFailure> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(method = %method, url = %url, "Panel request");

        let response = self
            .send_with_retry(|| {
                let request = self
                    .http
                    .request(method.clone(), &url)
                    .header(COOKIE, &session.cookie);
                match body {
                    Some(body) => request.json(body),
                    None => request,
                }
            })
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(CallFailure::Unauthorized);
        }
        let text = response.text().await.map_err(PanelError::from)?;
        if !status.is_success() {
            return Err(PanelError::UnexpectedStatus {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|error| PanelError::Decode(format!("{path}: {error}")))?;
        if !envelope.success {
            return Err(PanelError::RemoteOperation(envelope.msg).into());
        }
        Ok(envelope.obj)
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response, PanelError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(error) if is_transient(&error) => {
                    if attempt >= self.retry.attempts {
                        return Err(PanelError::TransientNetwork {
                            attempts: attempt,
                            message: error.to_string(),
                        });
                    }
                    let wait = self.retry.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %error,
                        "Panel request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Склеивает пары `name=value` из всех `Set-Cookie` в один заголовок `Cookie`.
fn session_cookie(response: &Response) -> Option<String> {
    let pairs: Vec<&str> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
