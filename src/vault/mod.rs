//! The vault root of trust.
//!
//! `open` turns the user's vault keypair plus the façade's encrypted
//! bootstrap blob into an in-memory `VaultRoot` owning the unwrapped root
//! folder key and root pointer signing key. `export` produces the offline
//! recovery bundle. Neither failure mode is recovered locally; a vault
//! that cannot open is surfaced to the caller as-is.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::api::transport::{TransportError, VaultTransport};
use crate::codec::export::{DerivationInfo, VaultExport};
use crate::crypto::ecies::{self, SECP256K1_PRIVATE_KEY_SIZE, SECP256K1_PUBLIC_KEY_SIZE};
use crate::crypto::utils::now_ms;
use crate::error::CoreError;

/// The user's secp256k1 vault keypair, produced by the external identity
/// issuer. The core only consumes it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VaultKeypair {
    private_key: [u8; SECP256K1_PRIVATE_KEY_SIZE],
    public_key: [u8; SECP256K1_PUBLIC_KEY_SIZE],
}

impl VaultKeypair {
    /// Accept a keypair from the identity layer. A malformed or absent
    /// identity is `IdentityMissing`.
    pub fn from_bytes(private_key: &[u8], public_key: &[u8]) -> Result<Self, CoreError> {
        let private_key: [u8; SECP256K1_PRIVATE_KEY_SIZE] = private_key
            .try_into()
            .map_err(|_| CoreError::IdentityMissing)?;
        let public_key: [u8; SECP256K1_PUBLIC_KEY_SIZE] = public_key
            .try_into()
            .map_err(|_| CoreError::IdentityMissing)?;
        if public_key[0] != 0x04 || private_key == [0u8; SECP256K1_PRIVATE_KEY_SIZE] {
            return Err(CoreError::IdentityMissing);
        }
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn private_key(&self) -> &[u8; SECP256K1_PRIVATE_KEY_SIZE] {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8; SECP256K1_PUBLIC_KEY_SIZE] {
        &self.public_key
    }
}

/// The materialized vault root. Owns the unwrapped root keys for the
/// session; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VaultRoot {
    /// Root folder pointer name.
    #[zeroize(skip)]
    pub root_ipns_name: String,
    /// Unwrapped 32-byte root folder key.
    root_folder_key: [u8; 32],
    /// Unwrapped 32-byte root pointer signing seed.
    root_ipns_private_key: [u8; 32],
    /// Wrapped forms retained for `export()`.
    #[zeroize(skip)]
    encrypted_root_folder_key: String,
    #[zeroize(skip)]
    encrypted_root_ipns_private_key: String,
    /// Root pointer sequence counter, zero until the first publish or
    /// verified resolve raises it.
    #[zeroize(skip)]
    pub sequence: u64,
}

impl VaultRoot {
    pub fn root_folder_key(&self) -> &[u8; 32] {
        &self.root_folder_key
    }

    pub fn root_ipns_private_key(&self) -> &[u8; 32] {
        &self.root_ipns_private_key
    }

    /// Build the offline recovery bundle. Independently usable by a
    /// recovery tool that holds the vault private key.
    pub fn export(&self, derivation_info: DerivationInfo) -> VaultExport {
        VaultExport::new(
            now_ms(),
            self.root_ipns_name.clone(),
            self.encrypted_root_folder_key.clone(),
            self.encrypted_root_ipns_private_key.clone(),
            derivation_info,
        )
    }
}

/// Open the vault: fetch the encrypted root of trust and unwrap it with
/// the vault key.
pub async fn open<T: VaultTransport>(
    transport: &T,
    keypair: &VaultKeypair,
) -> Result<VaultRoot, CoreError> {
    let bootstrap = match transport.fetch_vault().await {
        Ok(b) => b,
        Err(TransportError::NotFound) => return Err(CoreError::VaultNotInitialized),
        Err(e) => return Err(e.into()),
    };

    let root_folder_key =
        unwrap_key_material(&bootstrap.encrypted_root_folder_key, keypair.private_key())?;
    let root_ipns_private_key = unwrap_key_material(
        &bootstrap.encrypted_root_ipns_private_key,
        keypair.private_key(),
    )?;

    Ok(VaultRoot {
        root_ipns_name: bootstrap.root_ipns_name,
        root_folder_key,
        root_ipns_private_key,
        encrypted_root_folder_key: bootstrap.encrypted_root_folder_key,
        encrypted_root_ipns_private_key: bootstrap.encrypted_root_ipns_private_key,
        sequence: 0,
    })
}

/// Unwrap a hex ECIES envelope into 32 bytes of key material. A 64-byte
/// plaintext (expanded signing key form) contributes its seed half.
fn unwrap_key_material(
    wrapped_hex: &str,
    private_key: &[u8; SECP256K1_PRIVATE_KEY_SIZE],
) -> Result<[u8; 32], CoreError> {
    let wrapped = hex::decode(wrapped_hex).map_err(|_| CoreError::KeyUnwrappingFailed)?;
    let mut plaintext = ecies::unwrap_key(&wrapped, private_key)?;

    let result = match plaintext.len() {
        32 => {
            let mut key = [0u8; 32];
            key.copy_from_slice(&plaintext);
            Ok(key)
        }
        64 => {
            let mut key = [0u8; 32];
            key.copy_from_slice(&plaintext[..32]);
            Ok(key)
        }
        _ => Err(CoreError::KeyUnwrappingFailed),
    };

    plaintext.zeroize();
    result
}
