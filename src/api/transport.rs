//! The transport seam between the core and the façade.
//!
//! The core needs exactly these operations from the backend; everything
//! else (auth, quotas, pin bookkeeping) stays behind them. Tests implement
//! the trait with in-memory mocks.

use base64::Engine;
use reqwest::{Response, StatusCode};
use thiserror::Error;

use super::client::ApiClient;
use super::types::{
    AddBlockWire, PublishRequest, QuotaInfo, ResolveWire, ResolvedRecord, VaultBootstrap,
};

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Not authorized")]
    Unauthorized,
    #[error("Rate limited")]
    RateLimited,
    #[error("Storage quota exceeded")]
    QuotaExceeded,
    #[error("Not found")]
    NotFound,
    #[error("Request timed out")]
    Timeout,
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Unavailable(err.to_string())
        } else {
            TransportError::Protocol(err.to_string())
        }
    }

    /// Whether a retry or the cached-resolve fallback is appropriate.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Unavailable(_))
    }
}

/// The abstract backend the core publishes to and resolves from.
#[allow(async_fn_in_trait)]
pub trait VaultTransport {
    /// `GET /my-vault`: the encrypted root of trust for the session user.
    async fn fetch_vault(&self) -> Result<VaultBootstrap, TransportError>;

    /// `POST /ipfs/add`: pin an encrypted blob, returning its CID.
    async fn put_block(&self, data: &[u8]) -> Result<String, TransportError>;

    /// `GET /ipfs/:cid`: fetch an encrypted blob.
    async fn get_block(&self, cid: &str) -> Result<Vec<u8>, TransportError>;

    /// `POST /vault/unpin`: release a pinned blob. Idempotent.
    async fn unpin_block(&self, cid: &str) -> Result<(), TransportError>;

    /// `POST /ipns/publish`: submit a signed pointer record.
    async fn publish_record(&self, request: &PublishRequest) -> Result<(), TransportError>;

    /// `GET /ipns/resolve`: look up a pointer's current record.
    async fn resolve_record(&self, ipns_name: &str) -> Result<ResolvedRecord, TransportError>;

    /// `GET /quota`: current pin usage.
    async fn quota(&self) -> Result<QuotaInfo, TransportError>;
}

/// HTTP implementation of [`VaultTransport`] over [`ApiClient`].
pub struct HttpVaultTransport {
    client: ApiClient,
}

impl HttpVaultTransport {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

/// Map non-2xx statuses to transport errors.
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited,
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::INSUFFICIENT_STORAGE => {
            TransportError::QuotaExceeded
        }
        StatusCode::NOT_FOUND => TransportError::NotFound,
        s if s.is_server_error() => {
            let body = response.text().await.unwrap_or_default();
            TransportError::Unavailable(format!("{}: {}", s, body))
        }
        s => TransportError::Protocol(format!("unexpected status {}", s)),
    })
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, TransportError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|_| TransportError::Protocol(format!("invalid base64 in {}", field)))
}

impl VaultTransport for HttpVaultTransport {
    async fn fetch_vault(&self) -> Result<VaultBootstrap, TransportError> {
        let response = check_status(self.client.get("/my-vault").await?).await?;
        response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn put_block(&self, data: &[u8]) -> Result<String, TransportError> {
        let payload = data.to_vec();
        let response = self
            .client
            .post_multipart("/ipfs/add", move || {
                let part = reqwest::multipart::Part::bytes(payload.clone())
                    .file_name("encrypted")
                    .mime_str("application/octet-stream")
                    .unwrap_or_else(|_| reqwest::multipart::Part::bytes(payload.clone()));
                reqwest::multipart::Form::new().part("file", part)
            })
            .await?;
        let response = check_status(response).await?;
        let wire: AddBlockWire = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(wire.cid)
    }

    async fn get_block(&self, cid: &str) -> Result<Vec<u8>, TransportError> {
        let path = format!("/ipfs/{}", urlencoding::encode(cid));
        let response = check_status(self.client.get(&path).await?).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn unpin_block(&self, cid: &str) -> Result<(), TransportError> {
        let body = serde_json::json!({ "cid": cid });
        let response = self
            .client
            .post_json("/vault/unpin", &body, self.client.fetch_timeout())
            .await?;
        // Unpinning an already-released block is a success.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await.map(|_| ())
    }

    async fn publish_record(&self, request: &PublishRequest) -> Result<(), TransportError> {
        let response = self
            .client
            .post_json("/ipns/publish", request, self.client.publish_timeout())
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn resolve_record(&self, ipns_name: &str) -> Result<ResolvedRecord, TransportError> {
        let path = format!("/ipns/resolve?ipnsName={}", urlencoding::encode(ipns_name));
        let response = check_status(self.client.get(&path).await?).await?;
        let wire: ResolveWire = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let sequence = wire
            .sequence
            .parse::<u64>()
            .map_err(|_| TransportError::Protocol("invalid sequence".into()))?;

        Ok(ResolvedRecord {
            cid: wire.cid,
            sequence,
            signature: decode_b64("signature", &wire.signature)?,
            signer_public_key: decode_b64("signerPublicKey", &wire.signer_public_key)?,
            data: decode_b64("data", &wire.data)?,
            from_cache: wire.from_cache,
        })
    }

    async fn quota(&self) -> Result<QuotaInfo, TransportError> {
        let response = check_status(self.client.get("/quota").await?).await?;
        response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
