//! Cryptographic primitives for the vault core.
//!
//! Every operation here is byte-compatible with the CipherBox web client,
//! so both implementations read and write the same on-network data.

pub mod aes;
pub mod aes_ctr;
pub mod ecies;
pub mod ed25519;
pub mod hkdf;
pub mod ipns;
pub mod utils;

pub use aes::{decrypt_aes_gcm, encrypt_aes_gcm};
pub use aes_ctr::{decrypt_aes_ctr, decrypt_aes_ctr_range, encrypt_aes_ctr};
pub use ecies::{unwrap_key, wrap_key};
pub use ed25519::{generate_ed25519_keypair, get_public_key, sign_ed25519, verify_ed25519};
pub use hkdf::{
    derive_file_ipns_keypair, derive_file_metadata_key, derive_registry_ipns_keypair,
    derive_registry_key, derive_vault_ipns_keypair,
};
pub use ipns::{create_ipns_record, derive_ipns_name, marshal_ipns_record, IpnsRecord};
pub use utils::{clear_bytes, generate_iv, generate_random_bytes, generate_symmetric_key};
