//! Mutable-pointer (IPNS) records: creation, marshaling, name derivation,
//! and resolve-side validation.
//!
//! Record layout is compatible with the `ipns` npm package the web client
//! uses: CBOR-encoded data field, V1+V2 Ed25519 signatures, protobuf
//! IpnsEntry marshaling, and CIDv1 base36 names (`k51...`).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ciborium::Value as CborValue;
use multihash::Multihash;
use thiserror::Error;

use super::ed25519::{get_public_key, sign_ed25519, verify_ed25519};

/// Signature domain prefix per the IPNS spec.
const IPNS_SIGNATURE_PREFIX: &[u8] = b"ipns-signature:";

/// Record TTL: 5 minutes in nanoseconds (the ipns npm package default).
const DEFAULT_TTL_NS: u64 = 300_000_000_000;

/// Identity multihash code.
const IDENTITY_MULTIHASH_CODE: u64 = 0x00;

/// CIDv1 codec for libp2p keys.
const LIBP2P_KEY_CODEC: u64 = 0x72;

#[derive(Debug, Error)]
pub enum IpnsError {
    #[error("Record creation failed")]
    CreationFailed,
    #[error("Record marshaling failed")]
    MarshalingFailed,
    #[error("Name derivation failed")]
    DerivationFailed,
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("CBOR encoding failed")]
    CborFailed,
    #[error("Signing failed")]
    SigningFailed,
    #[error("Record signature did not verify")]
    SignatureMismatch,
}

/// A signed mutable-pointer record.
#[derive(Debug, Clone)]
pub struct IpnsRecord {
    /// Target path (e.g., "/ipfs/bafy...").
    pub value: String,
    /// RFC3339 validity timestamp, nanosecond precision.
    pub validity: String,
    /// Validity type (0 = EOL).
    pub validity_type: u32,
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// TTL in nanoseconds.
    pub ttl: u64,
    /// 64-byte V1 signature (value + validity + validityType).
    pub signature_v1: Vec<u8>,
    /// 64-byte V2 signature ("ipns-signature:" + CBOR data).
    pub signature_v2: Vec<u8>,
    /// CBOR-encoded record data, the V2 signing pre-image body.
    pub data: Vec<u8>,
    /// 32-byte Ed25519 public key of the signer.
    pub public_key: Vec<u8>,
}

/// The signed fields recovered from a validated record payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedPointerData {
    pub value: String,
    pub sequence: u64,
    pub validity: String,
}

/// Build the CBOR data field. Field order matches the ipns npm package:
/// TTL, Value, Sequence, Validity, ValidityType.
fn build_cbor_data(
    value: &str,
    validity: &str,
    sequence: u64,
    ttl: u64,
) -> Result<Vec<u8>, IpnsError> {
    let cbor_map = CborValue::Map(vec![
        (
            CborValue::Text("TTL".to_string()),
            CborValue::Integer(ttl.into()),
        ),
        (
            CborValue::Text("Value".to_string()),
            CborValue::Bytes(value.as_bytes().to_vec()),
        ),
        (
            CborValue::Text("Sequence".to_string()),
            CborValue::Integer(sequence.into()),
        ),
        (
            CborValue::Text("Validity".to_string()),
            CborValue::Bytes(validity.as_bytes().to_vec()),
        ),
        (
            CborValue::Text("ValidityType".to_string()),
            CborValue::Integer(0.into()),
        ),
    ]);

    let mut buf = Vec::new();
    ciborium::into_writer(&cbor_map, &mut buf).map_err(|_| IpnsError::CborFailed)?;
    Ok(buf)
}

/// Format a validity timestamp as RFC3339 with 9-digit nanoseconds,
/// e.g. "2026-02-08T23:31:12.138000000Z".
fn format_validity_timestamp(validity_time: SystemTime) -> String {
    let duration = validity_time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();

    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (year, month, day) = civil_from_days(days as i64);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
        year, month, day, hours, minutes, seconds, nanos
    )
}

/// Format a Unix-millisecond timestamp as RFC3339 with millisecond
/// precision, e.g. "2026-02-08T23:31:12.138Z". Used for the vault export
/// `exportedAt` stamp.
pub(crate) fn format_rfc3339_ms(unix_ms: u64) -> String {
    let secs = unix_ms / 1000;
    let millis = unix_ms % 1000;

    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (year, month, day) = civil_from_days(days as i64);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year, month, day, hours, minutes, seconds, millis
    )
}

/// Days since Unix epoch to (year, month, day). Howard Hinnant's
/// civil_from_days.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = (yoe as i64) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m as u32, d as u32)
}

/// V1 signature pre-image: value + validity + varint(validityType).
fn compute_v1_signature(
    ed25519_private_key: &[u8; 32],
    value: &str,
    validity: &str,
) -> Result<Vec<u8>, IpnsError> {
    let mut data = Vec::with_capacity(value.len() + validity.len() + 1);
    data.extend_from_slice(value.as_bytes());
    data.extend_from_slice(validity.as_bytes());
    data.push(0x00); // ValidityType 0 as varint

    sign_ed25519(&data, ed25519_private_key).map_err(|_| IpnsError::SigningFailed)
}

/// V2 signature pre-image: "ipns-signature:" + CBOR data.
fn compute_v2_signature(
    ed25519_private_key: &[u8; 32],
    cbor_data: &[u8],
) -> Result<Vec<u8>, IpnsError> {
    let mut data = Vec::with_capacity(IPNS_SIGNATURE_PREFIX.len() + cbor_data.len());
    data.extend_from_slice(IPNS_SIGNATURE_PREFIX);
    data.extend_from_slice(cbor_data);

    sign_ed25519(&data, ed25519_private_key).map_err(|_| IpnsError::SigningFailed)
}

/// Create a V1-compatible signed record for the given target and sequence.
pub fn create_ipns_record(
    ed25519_private_key: &[u8; 32],
    value: &str,
    sequence_number: u64,
    lifetime_ms: u64,
) -> Result<IpnsRecord, IpnsError> {
    let public_key =
        get_public_key(ed25519_private_key).map_err(|_| IpnsError::InvalidPrivateKey)?;

    let validity_time = SystemTime::now() + Duration::from_millis(lifetime_ms);
    let validity = format_validity_timestamp(validity_time);
    let ttl = DEFAULT_TTL_NS;

    let cbor_data = build_cbor_data(value, &validity, sequence_number, ttl)?;
    let signature_v2 = compute_v2_signature(ed25519_private_key, &cbor_data)?;
    let signature_v1 = compute_v1_signature(ed25519_private_key, value, &validity)?;

    Ok(IpnsRecord {
        value: value.to_string(),
        validity,
        validity_type: 0,
        sequence: sequence_number,
        ttl,
        signature_v1,
        signature_v2,
        data: cbor_data,
        public_key,
    })
}

/// Wrap an Ed25519 public key in the libp2p PublicKey protobuf:
/// message PublicKey { KeyType Type = 1; bytes Data = 2; } with Ed25519 = 1.
fn encode_libp2p_public_key(ed25519_public_key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ed25519_public_key.len() + 4);
    buf.push(0x08); // field 1, varint
    buf.push(0x01); // Ed25519
    buf.push(0x12); // field 2, length-delimited
    buf.push(ed25519_public_key.len() as u8);
    buf.extend_from_slice(ed25519_public_key);
    buf
}

/// Marshal a record to IpnsEntry protobuf bytes.
///
/// Fields: 1 Value, 2 signatureV1, 3 ValidityType, 4 Validity, 5 Sequence,
/// 6 TTL, 7 pubKey (libp2p-wrapped), 8 signatureV2, 9 data (CBOR).
pub fn marshal_ipns_record(record: &IpnsRecord) -> Result<Vec<u8>, IpnsError> {
    let mut buf = Vec::new();

    encode_proto_bytes(&mut buf, 1, record.value.as_bytes());
    encode_proto_bytes(&mut buf, 2, &record.signature_v1);
    encode_proto_varint(&mut buf, 3, record.validity_type as u64);
    encode_proto_bytes(&mut buf, 4, record.validity.as_bytes());
    encode_proto_varint(&mut buf, 5, record.sequence);
    encode_proto_varint(&mut buf, 6, record.ttl);
    encode_proto_bytes(&mut buf, 7, &encode_libp2p_public_key(&record.public_key));
    encode_proto_bytes(&mut buf, 8, &record.signature_v2);
    encode_proto_bytes(&mut buf, 9, &record.data);

    Ok(buf)
}

/// Append a protobuf length-delimited field.
fn encode_proto_bytes(buf: &mut Vec<u8>, field_number: u32, data: &[u8]) {
    push_varint(buf, ((field_number as u64) << 3) | 2);
    push_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Append a protobuf varint field.
fn encode_proto_varint(buf: &mut Vec<u8>, field_number: u32, value: u64) {
    push_varint(buf, (field_number as u64) << 3);
    push_varint(buf, value);
}

fn push_varint(buf: &mut Vec<u8>, value: u64) {
    let mut varint_buf = unsigned_varint::encode::u64_buffer();
    buf.extend_from_slice(unsigned_varint::encode::u64(value, &mut varint_buf));
}

/// Derive the base36 pointer name (`k...`) from an Ed25519 public key.
///
/// libp2p PublicKey protobuf -> identity multihash -> CIDv1 with the
/// libp2p-key codec -> base36.
pub fn derive_ipns_name(ed25519_public_key: &[u8; 32]) -> Result<String, IpnsError> {
    let libp2p_pub_key = encode_libp2p_public_key(ed25519_public_key);

    let multihash: Multihash<64> = Multihash::wrap(IDENTITY_MULTIHASH_CODE, &libp2p_pub_key)
        .map_err(|_| IpnsError::DerivationFailed)?;

    let mut cid_bytes = Vec::new();
    push_varint(&mut cid_bytes, 1); // CID version
    push_varint(&mut cid_bytes, LIBP2P_KEY_CODEC);
    cid_bytes.extend_from_slice(&multihash.to_bytes());

    Ok(format!("k{}", encode_base36(&cid_bytes)))
}

/// Unmarshal an IpnsEntry protobuf back into a record.
///
/// Inverse of [`marshal_ipns_record`]. Unknown fields are skipped.
pub fn unmarshal_ipns_record(bytes: &[u8]) -> Result<IpnsRecord, IpnsError> {
    let mut value = String::new();
    let mut validity = String::new();
    let mut validity_type = 0u32;
    let mut sequence = 0u64;
    let mut ttl = 0u64;
    let mut public_key = Vec::new();
    let mut signature_v1 = Vec::new();
    let mut signature_v2 = Vec::new();
    let mut data = Vec::new();

    let mut rest = bytes;
    while !rest.is_empty() {
        let (tag, after_tag) =
            unsigned_varint::decode::u64(rest).map_err(|_| IpnsError::MarshalingFailed)?;
        let field_number = tag >> 3;
        let wire_type = tag & 0x7;
        rest = after_tag;

        match wire_type {
            0 => {
                let (v, after) =
                    unsigned_varint::decode::u64(rest).map_err(|_| IpnsError::MarshalingFailed)?;
                rest = after;
                match field_number {
                    3 => validity_type = v as u32,
                    5 => sequence = v,
                    6 => ttl = v,
                    _ => {}
                }
            }
            2 => {
                let (len, after) =
                    unsigned_varint::decode::u64(rest).map_err(|_| IpnsError::MarshalingFailed)?;
                rest = after;
                let len = len as usize;
                if rest.len() < len {
                    return Err(IpnsError::MarshalingFailed);
                }
                let (payload, after) = rest.split_at(len);
                rest = after;
                match field_number {
                    1 => {
                        value = String::from_utf8(payload.to_vec())
                            .map_err(|_| IpnsError::MarshalingFailed)?
                    }
                    2 => signature_v1 = payload.to_vec(),
                    4 => {
                        validity = String::from_utf8(payload.to_vec())
                            .map_err(|_| IpnsError::MarshalingFailed)?
                    }
                    7 => public_key = decode_libp2p_public_key(payload)?,
                    8 => signature_v2 = payload.to_vec(),
                    9 => data = payload.to_vec(),
                    _ => {}
                }
            }
            _ => return Err(IpnsError::MarshalingFailed),
        }
    }

    Ok(IpnsRecord {
        value,
        validity,
        validity_type,
        sequence,
        ttl,
        signature_v1,
        signature_v2,
        data,
        public_key,
    })
}

/// Extract the raw Ed25519 key from a libp2p PublicKey protobuf.
fn decode_libp2p_public_key(bytes: &[u8]) -> Result<Vec<u8>, IpnsError> {
    // Expect: 0x08 0x01 (Ed25519) 0x12 <len> <key>.
    if bytes.len() < 4 || bytes[0] != 0x08 || bytes[1] != 0x01 || bytes[2] != 0x12 {
        return Err(IpnsError::InvalidPublicKey);
    }
    let len = bytes[3] as usize;
    if bytes.len() != 4 + len {
        return Err(IpnsError::InvalidPublicKey);
    }
    Ok(bytes[4..].to_vec())
}

/// Validate a resolved pointer payload.
///
/// Verifies the V2 signature over `"ipns-signature:" + data` with the
/// claimed signer key, checks the signer key re-derives the
/// self-certifying `pointer_name`, and decodes the signed CBOR fields.
/// Only the returned `SignedPointerData` may be trusted; the unsigned
/// response fields must be cross-checked against it by the caller.
pub fn validate_resolved_payload(
    pointer_name: &str,
    data: &[u8],
    signature_v2: &[u8],
    signer_public_key: &[u8],
) -> Result<SignedPointerData, IpnsError> {
    let key_bytes: [u8; 32] = signer_public_key
        .try_into()
        .map_err(|_| IpnsError::InvalidPublicKey)?;

    // Self-certification: the signer must own the name.
    let derived = derive_ipns_name(&key_bytes)?;
    if derived != pointer_name {
        return Err(IpnsError::SignatureMismatch);
    }

    let mut pre_image = Vec::with_capacity(IPNS_SIGNATURE_PREFIX.len() + data.len());
    pre_image.extend_from_slice(IPNS_SIGNATURE_PREFIX);
    pre_image.extend_from_slice(data);
    if !verify_ed25519(&pre_image, signature_v2, signer_public_key) {
        return Err(IpnsError::SignatureMismatch);
    }

    decode_cbor_data(data)
}

/// Decode the signed CBOR map into its Value/Sequence/Validity fields.
fn decode_cbor_data(data: &[u8]) -> Result<SignedPointerData, IpnsError> {
    let cbor: CborValue =
        ciborium::from_reader(data).map_err(|_| IpnsError::SignatureMismatch)?;
    let CborValue::Map(entries) = cbor else {
        return Err(IpnsError::SignatureMismatch);
    };

    let mut value = None;
    let mut sequence = None;
    let mut validity = None;

    for (k, v) in entries {
        let CborValue::Text(key) = k else { continue };
        match (key.as_str(), v) {
            ("Value", CborValue::Bytes(b)) => {
                value = Some(String::from_utf8(b).map_err(|_| IpnsError::SignatureMismatch)?);
            }
            ("Sequence", CborValue::Integer(i)) => {
                sequence = Some(u64::try_from(i).map_err(|_| IpnsError::SignatureMismatch)?);
            }
            ("Validity", CborValue::Bytes(b)) => {
                validity = Some(String::from_utf8(b).map_err(|_| IpnsError::SignatureMismatch)?);
            }
            _ => {}
        }
    }

    match (value, sequence, validity) {
        (Some(value), Some(sequence), Some(validity)) => Ok(SignedPointerData {
            value,
            sequence,
            validity,
        }),
        _ => Err(IpnsError::SignatureMismatch),
    }
}

/// Encode bytes as base36 (alphabet 0-9a-z), leading zero bytes preserved
/// as '0' digits.
fn encode_base36(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let leading_zeros = data.iter().take_while(|&&b| b == 0).count();

    let mut num = data.to_vec();
    let mut result = Vec::new();

    while !num.is_empty() {
        let mut remainder: u32 = 0;
        let mut quotient = Vec::new();

        for &byte in &num {
            let acc = (remainder << 8) | (byte as u32);
            let digit = acc / 36;
            remainder = acc % 36;

            if !quotient.is_empty() || digit > 0 {
                quotient.push(digit as u8);
            }
        }

        result.push(ALPHABET[remainder as usize]);
        num = quotient;
    }

    for _ in 0..leading_zeros {
        result.push(b'0');
    }

    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}
