// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Mock vs relay environment detection.
//!
//! Two probes run side by side: the node's client version (a development
//! chain identifies itself) and the FHEVM mock plugin's relayer metadata.
//! Only when both answer is the network treated as a local mock. A probe
//! that errors counts as "signal absent"; detection itself never fails.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::RelayerConfig;
use crate::blockchain::WalletTransport;

/// Substrings of `web3_clientVersion` that identify a development chain.
pub const DEV_CHAIN_MARKERS: &[&str] = &["hardhat"];

/// RPC method exposed by the FHEVM mock plugin.
pub const RELAYER_METADATA_METHOD: &str = "fhevm_relayer_metadata";

/// Addresses of the FHEVM host contracts on a mock node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerMetadata {
    #[serde(rename = "ACLAddress")]
    pub acl_address: Address,
    #[serde(rename = "InputVerifierAddress")]
    pub input_verifier_address: Address,
    #[serde(rename = "KMSVerifierAddress")]
    pub kms_verifier_address: Address,
}

/// Parameters of the deterministic mock cryptosystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub metadata: RelayerMetadata,
}

/// Outcome of environment detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    Mock(MockConfig),
    Relay(RelayerConfig),
}

impl NetworkMode {
    pub fn is_mock(&self) -> bool {
        matches!(self, NetworkMode::Mock(_))
    }
}

async fn probe_dev_chain<T: WalletTransport + ?Sized>(transport: &T) -> bool {
    match transport.client_version().await {
        Ok(version) => {
            let version = version.to_lowercase();
            DEV_CHAIN_MARKERS.iter().any(|marker| version.contains(marker))
        }
        Err(e) => {
            tracing::debug!(error = %e, "Client version probe failed");
            false
        }
    }
}

async fn probe_relayer_metadata<T: WalletTransport + ?Sized>(transport: &T) -> Option<RelayerMetadata> {
    let raw = match transport.request(RELAYER_METADATA_METHOD, json!([])).await {
        Ok(Value::Null) => return None,
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "Relayer metadata probe failed");
            return None;
        }
    };

    serde_json::from_value(raw)
        .inspect_err(|e| tracing::debug!(error = %e, "Relayer metadata unreadable"))
        .ok()
}

/// Classify the active network.
///
/// `relay` is the production configuration returned when the mock signals
/// are not both present.
pub async fn detect_mode<T: WalletTransport + ?Sized>(transport: &T, relay: &RelayerConfig) -> NetworkMode {
    let (is_dev_chain, metadata) = tokio::join!(
        probe_dev_chain(transport),
        probe_relayer_metadata(transport)
    );

    let metadata = match (is_dev_chain, metadata) {
        (true, Some(metadata)) => metadata,
        _ => {
            tracing::debug!(is_dev_chain, "Using relay mode");
            return NetworkMode::Relay(relay.clone());
        }
    };

    match transport.chain_id().await {
        Ok(chain_id) => {
            tracing::debug!(chain_id, "Using mock mode");
            NetworkMode::Mock(MockConfig {
                rpc_url: transport.rpc_url().to_string(),
                chain_id,
                metadata,
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "Mock signals present but chain id unavailable, using relay mode");
            NetworkMode::Relay(relay.clone())
        }
    }
}
