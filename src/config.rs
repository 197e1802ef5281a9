// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names and defaults used by the `plantchain` binary.
//! Every variable also has a matching command-line flag.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PLANTCHAIN_RPC_URL` | JSON-RPC endpoint of the wallet's chain | `http://localhost:8545` |
//! | `PLANTCHAIN_WALLET_KEY` | PEM file holding the wallet's secp256k1 key | - |
//! | `PLANTCHAIN_PRIVATE_KEY` | Hex wallet key, used when no PEM file is set | - |
//! | `PLANTCHAIN_DEPLOYMENTS` | Ledger address book (JSON) | `deployments.json` |
//! | `RELAYER_URL` | Relayer base URL for relay mode | Zama testnet relayer |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::{Path, PathBuf};

use alloy::signers::local::PrivateKeySigner;

use crate::blockchain::signing::{signer_from_hex, signer_from_pem_file, KeyError};
use crate::blockchain::{Deployments, HARDHAT};
use crate::fhevm::RelayerConfig;

/// Environment variable for the JSON-RPC endpoint.
pub const RPC_URL_ENV: &str = "PLANTCHAIN_RPC_URL";

/// Environment variable for the PEM-encoded wallet key file.
///
/// Takes precedence over [`PRIVATE_KEY_ENV`].
pub const WALLET_KEY_ENV: &str = "PLANTCHAIN_WALLET_KEY";

/// Environment variable for a hex-encoded wallet key.
pub const PRIVATE_KEY_ENV: &str = "PLANTCHAIN_PRIVATE_KEY";

/// Environment variable for the ledger address book path.
///
/// The file is the JSON object written by the contract deployment scripts,
/// keyed by decimal chain id.
pub const DEPLOYMENTS_ENV: &str = "PLANTCHAIN_DEPLOYMENTS";

/// Environment variable overriding the relayer base URL.
pub const RELAYER_URL_ENV: &str = "RELAYER_URL";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default address book path, relative to the working directory.
pub const DEFAULT_DEPLOYMENTS_PATH: &str = "deployments.json";

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Where the wallet key comes from.
#[derive(Clone)]
pub enum KeySource {
    PemFile(PathBuf),
    Hex(String),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::PemFile(path) => f.debug_tuple("PemFile").field(path).finish(),
            KeySource::Hex(_) => f.write_str("Hex(<redacted>)"),
        }
    }
}

impl KeySource {
    /// Pick the PEM file when set, else the hex key.
    pub fn resolve(pem_file: Option<PathBuf>, hex_key: Option<String>) -> Option<Self> {
        pem_file
            .map(KeySource::PemFile)
            .or_else(|| hex_key.map(KeySource::Hex))
    }

    pub fn signer(&self) -> Result<PrivateKeySigner, KeyError> {
        match self {
            KeySource::PemFile(path) => signer_from_pem_file(path),
            KeySource::Hex(key) => signer_from_hex(key),
        }
    }
}

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub key: KeySource,
    pub deployments_path: PathBuf,
    pub relayer: RelayerConfig,
}

impl ClientConfig {
    pub fn new(rpc_url: Option<String>, key: KeySource, deployments_path: Option<PathBuf>) -> Self {
        Self {
            rpc_url: rpc_url.unwrap_or_else(|| HARDHAT.rpc_url.to_string()),
            key,
            deployments_path: deployments_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEPLOYMENTS_PATH)),
            relayer: RelayerConfig::sepolia(),
        }
    }

    pub fn with_relayer_url(mut self, relayer_url: Option<String>) -> Self {
        if let Some(url) = relayer_url {
            self.relayer = self.relayer.with_relayer_url(url);
        }
        self
    }

    pub fn load_deployments(&self) -> Result<Deployments, std::io::Error> {
        load_deployments(&self.deployments_path)
    }
}

/// Read the address book, treating a missing file as "no deployments".
pub fn load_deployments(path: &Path) -> Result<Deployments, std::io::Error> {
    match Deployments::from_file(path) {
        Ok(deployments) => Ok(deployments),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Address book not found; every chain is unsupported");
            Ok(Deployments::new())
        }
        Err(e) => Err(e),
    }
}
