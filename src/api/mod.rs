//! Façade API layer.
//!
//! The core consumes the CipherBox backend through the narrow
//! [`transport::VaultTransport`] trait; `client` provides the HTTP
//! implementation. Everything above this module is transport-agnostic,
//! which is also what makes the pipeline and session testable against
//! mock backends.

pub mod client;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use transport::{HttpVaultTransport, TransportError, VaultTransport};
pub use types::{PublishRequest, QuotaInfo, ResolvedRecord, VaultBootstrap};
