// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet / execution transport.
//!
//! The client talks to the wallet through [`WalletTransport`]: account
//! request, chain-id and client-version queries, a generic RPC passthrough
//! and typed structured-data (EIP-712) signing. Free-form message signing is
//! deliberately absent from the interface.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use alloy::{
    dyn_abi::TypedData,
    network::EthereumWallet,
    primitives::{Address, Signature},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::{local::PrivateKeySigner, Signer},
};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Errors raised by a wallet transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Request rejected by wallet: {0}")]
    Rejected(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Unexpected response to {method}: {reason}")]
    Decode { method: String, reason: String },
}

/// Capabilities the client needs from the connected wallet.
#[async_trait]
pub trait WalletTransport: Send + Sync {
    /// RPC endpoint backing this transport.
    fn rpc_url(&self) -> &str;

    /// Ask the wallet for its accounts (`eth_requestAccounts`).
    async fn request_accounts(&self) -> Result<Vec<Address>, TransportError>;

    /// Active chain id (`eth_chainId`).
    async fn chain_id(&self) -> Result<u64, TransportError>;

    /// Node client version (`web3_clientVersion`).
    async fn client_version(&self) -> Result<String, TransportError>;

    /// Generic JSON-RPC passthrough.
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Typed structured-data signature (`eth_signTypedData_v4`).
    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, TransportError>;
}

/// Parse a `0x`-prefixed quantity returned by a node.
pub fn parse_quantity(method: &str, raw: &str) -> Result<u64, TransportError> {
    let digits = raw.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|e| TransportError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

/// Transport backed by an HTTP node and a local private key.
pub struct LocalWalletTransport {
    rpc_url: String,
    provider: DynProvider,
    signer: PrivateKeySigner,
}

impl LocalWalletTransport {
    /// Connect to `rpc_url`, signing with `signer`.
    pub fn new(rpc_url: &str, signer: PrivateKeySigner) -> Result<Self, TransportError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| TransportError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(url)
            .erased();

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            provider,
            signer,
        })
    }

    /// Provider with the wallet filler attached, for contract bindings.
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl WalletTransport for LocalWalletTransport {
    fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, TransportError> {
        Ok(vec![self.signer.address()])
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| TransportError::Rpc(e.to_string()))
    }

    async fn client_version(&self) -> Result<String, TransportError> {
        self.provider
            .get_client_version()
            .await
            .map_err(|e| TransportError::Rpc(e.to_string()))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.provider
            .raw_request::<Value, Value>(Cow::Owned(method.to_string()), params)
            .await
            .map_err(|e| TransportError::Rpc(e.to_string()))
    }

    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, TransportError> {
        self.signer
            .sign_dynamic_typed_data(typed_data)
            .await
            .map_err(|e| TransportError::Signing(e.to_string()))
    }
}

/// Self-contained transport that answers RPC locally.
///
/// Stands in for a browser wallet on development setups and in tests. Every
/// request is counted so callers can assert that nothing hit the network.
pub struct InMemoryTransport {
    signer: PrivateKeySigner,
    chain_id: AtomicU64,
    rpc_url: String,
    client_version: Option<String>,
    relayer_metadata: Option<Value>,
    reject_signatures: bool,
    calls: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new(signer: PrivateKeySigner, chain_id: u64) -> Self {
        Self {
            signer,
            chain_id: AtomicU64::new(chain_id),
            rpc_url: "http://localhost:8545".to_string(),
            client_version: None,
            relayer_metadata: None,
            reject_signatures: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer `web3_clientVersion` with `version` (otherwise the call errors).
    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = Some(version.into());
        self
    }

    /// Answer `fhevm_relayer_metadata` with `metadata` (otherwise the call errors).
    pub fn with_relayer_metadata(mut self, metadata: Value) -> Self {
        self.relayer_metadata = Some(metadata);
        self
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    /// Make every signature request fail as if the user declined it.
    pub fn rejecting_signatures(mut self) -> Self {
        self.reject_signatures = true;
        self
    }

    /// Simulate the user switching networks in the wallet.
    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Number of requests answered so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletTransport for InMemoryTransport {
    fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, TransportError> {
        self.record();
        Ok(vec![self.signer.address()])
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        self.record();
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    async fn client_version(&self) -> Result<String, TransportError> {
        self.record();
        self.client_version
            .clone()
            .ok_or_else(|| TransportError::Rpc("web3_clientVersion unavailable".to_string()))
    }

    async fn request(&self, method: &str, _params: Value) -> Result<Value, TransportError> {
        match method {
            "eth_chainId" => {
                let chain_id = self.chain_id().await?;
                Ok(json!(format!("{chain_id:#x}")))
            }
            "web3_clientVersion" => self.client_version().await.map(Value::String),
            "eth_accounts" | "eth_requestAccounts" => {
                let accounts = self.request_accounts().await?;
                Ok(json!(accounts))
            }
            "fhevm_relayer_metadata" => {
                self.record();
                self.relayer_metadata
                    .clone()
                    .ok_or_else(|| TransportError::Rpc(format!("method {method} not found")))
            }
            _ => {
                self.record();
                Err(TransportError::Rpc(format!("method {method} not found")))
            }
        }
    }

    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, TransportError> {
        self.record();
        if self.reject_signatures {
            return Err(TransportError::Rejected("user rejected the request".to_string()));
        }
        self.signer
            .sign_dynamic_typed_data(typed_data)
            .await
            .map_err(|e| TransportError::Signing(e.to_string()))
    }
}
