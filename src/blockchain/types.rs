// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use std::collections::BTreeMap;
use std::path::Path;

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: &'static str,
    /// Block explorer URL (empty for local nodes)
    pub explorer_url: &'static str,
}

/// Ethereum Sepolia testnet, where the production relayer runs.
pub const SEPOLIA: NetworkConfig = NetworkConfig {
    name: "Sepolia",
    chain_id: 11155111,
    rpc_url: "https://ethereum-sepolia-rpc.publicnode.com",
    explorer_url: "https://sepolia.etherscan.io",
};

/// Local Hardhat node with the FHEVM mock plugin.
pub const HARDHAT: NetworkConfig = NetworkConfig {
    name: "Hardhat",
    chain_id: 31337,
    rpc_url: "http://localhost:8545",
    explorer_url: "",
};

/// Look up a known network by chain id.
pub fn known_network(chain_id: u64) -> Option<&'static NetworkConfig> {
    [&SEPOLIA, &HARDHAT]
        .into_iter()
        .find(|network| network.chain_id == chain_id)
}

/// Explorer link for a transaction, if the network has an explorer.
pub fn explorer_tx_url(chain_id: u64, tx_hash: B256) -> Option<String> {
    known_network(chain_id)
        .filter(|network| !network.explorer_url.is_empty())
        .map(|network| format!("{}/tx/{:?}", network.explorer_url, tx_hash))
}

/// Ledger coordinates for one session: which chain, which RPC, which contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub chain_id: u64,
    pub rpc_endpoint: String,
    pub contract_address: Address,
}

/// One entry of the deployment address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub address: Address,
    pub chain_id: u64,
    #[serde(default)]
    pub chain_name: String,
}

/// Ledger contract address book keyed by chain id.
///
/// The on-disk format is the JSON object emitted by the contract
/// deployment scripts: `{"11155111": {"address": "0x..", "chainId": 11155111,
/// "chainName": "sepolia"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deployments {
    entries: BTreeMap<u64, Deployment>,
}

impl Deployments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the deployment for a chain.
    pub fn with(mut self, chain_id: u64, address: Address, chain_name: impl Into<String>) -> Self {
        self.entries.insert(
            chain_id,
            Deployment {
                address,
                chain_id,
                chain_name: chain_name.into(),
            },
        );
        self
    }

    /// Parse the address-book JSON.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let by_key: BTreeMap<String, Deployment> = serde_json::from_str(raw)?;
        let entries = by_key
            .into_values()
            .map(|deployment| (deployment.chain_id, deployment))
            .collect();
        Ok(Self { entries })
    }

    /// Load the address book from a file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn get(&self, chain_id: u64) -> Option<&Deployment> {
        self.entries.get(&chain_id)
    }

    /// Ledger address for `chain_id`, or `NetworkMismatch`.
    pub fn resolve(&self, chain_id: u64) -> Result<Address, ClientError> {
        self.get(chain_id)
            .map(|deployment| deployment.address)
            .ok_or(ClientError::NetworkMismatch { chain_id })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: B256,
    /// Block number where transaction was included
    pub block_number: u64,
    /// Whether the transaction was successful
    pub success: bool,
}

/// Plant identifier as used by the ledger contract.
pub type PlantId = U256;

/// Plant record as stored by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantRecord {
    pub id: PlantId,
    pub owner: Address,
    pub name: String,
    pub species: String,
    pub description: String,
    pub image_id: String,
    pub created_at: u64,
}

/// Fields supplied when registering a plant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPlant {
    pub name: String,
    pub species: String,
    pub description: String,
    pub image_id: String,
}

/// A growth log entry attached to a plant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthLogEntry {
    pub log_id: U256,
    pub description: String,
    pub image_id: String,
    pub timestamp: u64,
}

/// Why points were credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PointReason {
    Create = 1,
    Log = 2,
    Tip = 3,
}

impl PointReason {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PointReason::Create),
            2 => Some(PointReason::Log),
            3 => Some(PointReason::Tip),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            PointReason::Create => "plant created",
            PointReason::Log => "growth log added",
            PointReason::Tip => "tipped by another user",
        }
    }
}

/// Append-only record of a points credit, owned by the ledger contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsLedgerEntry {
    pub from_address: Address,
    pub amount: u32,
    pub reason: PointReason,
    pub timestamp: u64,
}

/// Fee for unlocking a plant's point log: 0.0001 ETH in wei.
pub const POINT_LOG_VIEW_FEE_WEI: u128 = 100_000_000_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS_BOOK: &str = r#"{
        "11155111": {
            "address": "0x1111111111111111111111111111111111111111",
            "chainId": 11155111,
            "chainName": "sepolia"
        },
        "31337": {
            "address": "0x2222222222222222222222222222222222222222",
            "chainId": 31337,
            "chainName": "localhost"
        }
    }"#;

    #[test]
    fn parses_address_book() {
        let deployments = Deployments::from_json(ADDRESS_BOOK).unwrap();
        assert_eq!(
            deployments.resolve(31337).unwrap(),
            "0x2222222222222222222222222222222222222222".parse::<Address>().unwrap()
        );
        assert_eq!(deployments.get(11155111).unwrap().chain_name, "sepolia");
    }

    #[test]
    fn unknown_chain_is_network_mismatch() {
        let deployments = Deployments::from_json(ADDRESS_BOOK).unwrap();
        let err = deployments.resolve(1).unwrap_err();
        assert!(matches!(err, ClientError::NetworkMismatch { chain_id: 1 }));
    }

    #[test]
    fn reason_codes_round_trip() {
        for reason in [PointReason::Create, PointReason::Log, PointReason::Tip] {
            assert_eq!(PointReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(PointReason::from_code(0), None);
        assert_eq!(PointReason::Tip.code(), 3);
    }

    #[test]
    fn explorer_links_only_for_public_networks() {
        assert!(explorer_tx_url(SEPOLIA.chain_id, B256::ZERO)
            .unwrap()
            .starts_with("https://sepolia.etherscan.io/tx/0x"));
        assert!(explorer_tx_url(HARDHAT.chain_id, B256::ZERO).is_none());
    }

    #[test]
    fn fee_is_one_ten_thousandth_ether() {
        assert_eq!(POINT_LOG_VIEW_FEE_WEI * 10_000, 1_000_000_000_000_000_000);
    }
}
