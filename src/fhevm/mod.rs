// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confidential-value runtime.
//!
//! ## Modules
//!
//! - `runtime` - one-shot load and initialization of the cryptosystem runtime
//! - `detect` - mock vs relay classification of the active network
//! - `instance` - per-chain instance factory
//! - `input` - single-use encrypted inputs
//! - `eip712` - decryption keypairs and the signed authorization document
//! - `decrypt` - public and user decryption
//! - `relayer` - production relayer runtime over HTTP
//! - `mock` - deterministic in-process cryptosystem for local networks

use std::collections::HashMap;

use alloy::primitives::{address, Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod decrypt;
pub mod detect;
pub mod eip712;
pub mod input;
pub mod instance;
pub mod mock;
pub mod relayer;
pub mod runtime;

pub use decrypt::DecryptionCoordinator;
pub use detect::{detect_mode, MockConfig, NetworkMode, RelayerMetadata};
pub use eip712::{AuthorizationMessage, DecryptionDomain, DecryptionKeypair};
pub use input::{EncryptedInput, EncryptedInputBuilder};
pub use instance::{ConfidentialInstance, InstanceFactory};
pub use runtime::{LoadError, RelayerRuntime, RuntimeBootstrapper, RuntimeLoader};

/// Opaque reference to an encrypted value held by the co-processor.
pub type CiphertextHandle = B256;

/// Which cryptosystem backs an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptosystemMode {
    /// Deterministic stub for local development chains.
    Mock,
    /// Production relayer and KMS.
    Relay,
}

impl std::fmt::Display for CryptosystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptosystemMode::Mock => f.write_str("mock"),
            CryptosystemMode::Relay => f.write_str("relay"),
        }
    }
}

/// Errors raised by a cryptosystem backend.
#[derive(Debug, thiserror::Error)]
pub enum FhevmError {
    #[error("access denied for handle {0}")]
    AccessDenied(CiphertextHandle),

    #[error("invalid input proof: {0}")]
    InvalidProof(String),

    #[error("authorization signature rejected: {0}")]
    SignatureRejected(String),

    #[error("authorization window is not valid at {now}")]
    AuthorizationExpired { now: u64 },

    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(CiphertextHandle),

    #[error("relayer returned HTTP {status}: {body}")]
    RelayerStatus { status: u16, body: String },

    #[error("relayer error: {0}")]
    Relayer(String),

    #[error("codec error: {0}")]
    Codec(String),
}

/// Production relayer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerConfig {
    pub relayer_url: String,
    /// Host chain the ledger lives on.
    pub chain_id: u64,
    /// Chain of the decryption gateway (EIP-712 domain chain id).
    pub gateway_chain_id: u64,
    pub acl_contract_address: Address,
    pub kms_contract_address: Address,
    pub input_verifier_contract_address: Address,
    pub verifying_contract_address_decryption: Address,
    pub verifying_contract_address_input_verification: Address,
    /// RPC endpoint of the active wallet transport, merged in at instance creation.
    #[serde(default)]
    pub network_url: Option<String>,
}

impl RelayerConfig {
    /// Zama testnet deployment on Sepolia.
    pub fn sepolia() -> Self {
        Self {
            relayer_url: "https://relayer.testnet.zama.cloud".to_string(),
            chain_id: 11155111,
            gateway_chain_id: 55815,
            acl_contract_address: address!("0x687820221192C5B662b25367F70076A37bc79b6c"),
            kms_contract_address: address!("0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC"),
            input_verifier_contract_address: address!("0xbc91f3daD1A5F19F8390c400196e58073B6a0BC4"),
            verifying_contract_address_decryption: address!("0xb6E160B1ff80D67Bfe90A85eE06Ce0A2613607D1"),
            verifying_contract_address_input_verification: address!("0x7048C39f048125eDa9d678AEbaDfB22F7900a29F"),
            network_url: None,
        }
    }

    pub fn with_relayer_url(mut self, relayer_url: impl Into<String>) -> Self {
        self.relayer_url = relayer_url.into();
        self
    }

    /// Merge the active wallet transport's endpoint into the defaults.
    pub fn with_network(mut self, network_url: impl Into<String>) -> Self {
        self.network_url = Some(network_url.into());
        self
    }
}

/// Ciphertext handles plus the proof of well-formedness covering them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBatch {
    pub handles: Vec<CiphertextHandle>,
    pub input_proof: Bytes,
}

/// A (handle, contract) pair to decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleContractPair {
    pub handle: CiphertextHandle,
    pub contract_address: Address,
}

/// Everything the relayer needs for a signed user decryption.
#[derive(Debug, Clone)]
pub struct UserDecryptRequest {
    pub pairs: Vec<HandleContractPair>,
    pub keypair: DecryptionKeypair,
    /// 65-byte typed-data signature over the authorization document.
    pub signature: Bytes,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    pub start_timestamp: u64,
    pub duration_days: u64,
}

/// Capability interface of an initialized cryptosystem instance.
///
/// Mirrors the runtime surface the client relies on and nothing more:
/// encrypted input creation, public decryption, keypair generation,
/// authorization document creation and user decryption.
#[async_trait]
pub trait FhevmBackend: Send + Sync {
    fn mode(&self) -> CryptosystemMode;

    /// Encrypt `values` as `euint32` operands bound to `(contract, user)`.
    async fn encrypt_u32(
        &self,
        contract: Address,
        user: Address,
        values: &[u32],
    ) -> Result<EncryptedBatch, FhevmError>;

    /// Decrypt a publicly decryptable handle.
    async fn public_decrypt(
        &self,
        contract: Address,
        handle: CiphertextHandle,
    ) -> Result<U256, FhevmError>;

    /// Fresh ephemeral keypair for one user decryption.
    fn generate_keypair(&self) -> DecryptionKeypair {
        DecryptionKeypair::generate()
    }

    /// Authorization document binding the keypair to `contracts` for a window.
    fn create_eip712(
        &self,
        public_key: &Bytes,
        contracts: &[Address],
        start_timestamp: u64,
        duration_days: u64,
    ) -> AuthorizationMessage;

    /// Decrypt handles for the signing user, keyed by handle.
    async fn user_decrypt(
        &self,
        request: &UserDecryptRequest,
    ) -> Result<HashMap<CiphertextHandle, U256>, FhevmError>;
}
