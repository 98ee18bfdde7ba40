//! HTTP client for the façade API.
//!
//! Wraps `reqwest` with bearer-token injection and a single-flight token
//! refresh: when N requests hit a 401 concurrently, exactly one refresh
//! call goes to the backend and every waiter retries with the new token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::transport::TransportError;
use super::types::{RefreshResponseWire, RefreshWire};
use crate::config::CoreConfig;

/// Client type header: the backend returns refresh tokens in the body
/// (not cookies) for non-web clients.
const CLIENT_TYPE_HEADER: &str = "X-Client-Type";

pub struct ApiClient {
    client: Client,
    base_url: String,
    client_type: &'static str,
    access_token: RwLock<Option<String>>,
    refresh_token: RwLock<Option<String>>,
    /// Bumped on every successful refresh; lets late 401 handlers detect
    /// that another task already refreshed for them.
    token_generation: AtomicU64,
    refresh_lock: Mutex<()>,
    /// Deadline for block fetch/put requests.
    fetch_timeout: Duration,
    /// Deadline for pointer publish requests.
    publish_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &CoreConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client_type: "core",
            access_token: RwLock::new(None),
            refresh_token: RwLock::new(None),
            token_generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
            fetch_timeout: config.fetch_timeout,
            publish_timeout: config.publish_timeout,
        }
    }

    /// Install the session tokens after login.
    pub async fn set_tokens(&self, access_token: String, refresh_token: String) {
        *self.access_token.write().await = Some(access_token);
        *self.refresh_token.write().await = Some(refresh_token);
        self.token_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop both tokens (logout / teardown).
    pub async fn clear_tokens(&self) {
        *self.access_token.write().await = None;
        *self.refresh_token.write().await = None;
    }

    /// GET with auth, refresh-and-retry-once on 401.
    pub async fn get(&self, path: &str) -> Result<Response, TransportError> {
        self.with_refresh(|| self.send_get(path)).await
    }

    /// POST JSON with auth, refresh-and-retry-once on 401.
    pub async fn post_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        self.with_refresh(|| self.send_post_json(path, body, timeout))
            .await
    }

    /// POST multipart with auth, refresh-and-retry-once on 401. The form
    /// is rebuilt per attempt because multipart bodies are not reusable.
    pub async fn post_multipart<F>(
        &self,
        path: &str,
        make_form: F,
    ) -> Result<Response, TransportError>
    where
        F: Fn() -> reqwest::multipart::Form,
    {
        self.with_refresh(|| self.send_post_multipart(path, make_form()))
            .await
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    async fn send_get(&self, path: &str) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.access_token.read().await.clone();

        let mut builder = self
            .client
            .get(&url)
            .header(CLIENT_TYPE_HEADER, self.client_type)
            .timeout(self.fetch_timeout);
        if let Some(t) = token {
            builder = builder.bearer_auth(t);
        }
        builder.send().await.map_err(TransportError::from_reqwest)
    }

    async fn send_post_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.access_token.read().await.clone();

        let mut builder = self
            .client
            .post(&url)
            .header(CLIENT_TYPE_HEADER, self.client_type)
            .timeout(timeout)
            .json(body);
        if let Some(t) = token {
            builder = builder.bearer_auth(t);
        }
        builder.send().await.map_err(TransportError::from_reqwest)
    }

    async fn send_post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.access_token.read().await.clone();

        let mut builder = self
            .client
            .post(&url)
            .header(CLIENT_TYPE_HEADER, self.client_type)
            .timeout(self.fetch_timeout)
            .multipart(form);
        if let Some(t) = token {
            builder = builder.bearer_auth(t);
        }
        builder.send().await.map_err(TransportError::from_reqwest)
    }

    /// Run a request; on 401, refresh the token (single-flight) and retry
    /// exactly once.
    async fn with_refresh<F, Fut>(&self, send: F) -> Result<Response, TransportError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Response, TransportError>>,
    {
        let response = send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        self.refresh_access_token().await?;

        let retried = send().await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        Ok(retried)
    }

    /// Single-flight refresh. Waiters that arrive while a refresh is in
    /// progress reuse its result instead of issuing their own call.
    async fn refresh_access_token(&self) -> Result<(), TransportError> {
        let generation_before = self.token_generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        // Someone else refreshed while we waited for the lock.
        if self.token_generation.load(Ordering::SeqCst) != generation_before {
            return Ok(());
        }

        let refresh_token = self
            .refresh_token
            .read()
            .await
            .clone()
            .ok_or(TransportError::Unauthorized)?;

        let url = format!("{}/auth/refresh", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(CLIENT_TYPE_HEADER, self.client_type)
            .timeout(self.fetch_timeout)
            .json(&RefreshWire { refresh_token })
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(TransportError::Unauthorized);
        }

        let tokens: RefreshResponseWire = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        *self.access_token.write().await = Some(tokens.access_token);
        *self.refresh_token.write().await = Some(tokens.refresh_token);
        self.token_generation.fetch_add(1, Ordering::SeqCst);
        log::debug!("Access token refreshed");
        Ok(())
    }
}
