//! Request and response types for the façade API.
//!
//! Wire structs use camelCase serialization to match the backend's JSON.

use serde::{Deserialize, Serialize};

/// Response from `GET /my-vault`: the encrypted root of trust.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultBootstrap {
    /// Root folder pointer name (k51...).
    pub root_ipns_name: String,
    /// Root folder key, ECIES-wrapped to the vault public key (hex).
    pub encrypted_root_folder_key: String,
    /// Root pointer signing key, ECIES-wrapped (hex).
    pub encrypted_root_ipns_private_key: String,
}

/// Body for `POST /ipns/publish`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Pointer name being updated.
    pub ipns_name: String,
    /// Base64-encoded marshaled signed record.
    pub record: String,
    /// The CID the record points at, for backend pin bookkeeping.
    pub metadata_cid: String,
}

/// A resolved pointer record as returned by `GET /ipns/resolve`.
///
/// All fields except `from_cache` are untrusted until the signature has
/// been verified against the self-certifying name.
#[derive(Debug, Clone)]
pub struct ResolvedRecord {
    /// Claimed current target CID.
    pub cid: String,
    /// Claimed sequence number.
    pub sequence: u64,
    /// V2 record signature (64 bytes).
    pub signature: Vec<u8>,
    /// Claimed signer Ed25519 public key (32 bytes).
    pub signer_public_key: Vec<u8>,
    /// Signed CBOR data field, the signature pre-image body.
    pub data: Vec<u8>,
    /// Whether the backend served this from its own cache.
    pub from_cache: bool,
}

/// Response from `GET /quota`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

/// Wire form of the resolve response; numbers arrive as strings because
/// the backend handles sequences as bigints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResolveWire {
    pub cid: String,
    pub sequence: String,
    /// Base64.
    pub signature: String,
    /// Base64.
    pub signer_public_key: String,
    /// Base64 CBOR.
    pub data: String,
    #[serde(default)]
    pub from_cache: bool,
}

/// Wire form of `POST /ipfs/add` responses.
#[derive(Debug, Deserialize)]
pub(crate) struct AddBlockWire {
    pub cid: String,
}

/// Body for `POST /auth/refresh`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshWire {
    pub refresh_token: String,
}

/// Response from `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshResponseWire {
    pub access_token: String,
    pub refresh_token: String,
}
