// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for the ledger scenarios: a local Hardhat-like chain with
//! the mock cryptosystem and one ledger deployment.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use serde_json::{json, Value};

use plantchain_client::blockchain::{Deployments, InMemoryTransport};
use plantchain_client::fhevm::mock::MockCoprocessor;
use plantchain_client::fhevm::{
    InstanceFactory, LoadError, RelayerConfig, RelayerRuntime, RuntimeBootstrapper, RuntimeLoader,
};
use plantchain_client::ledger::MockPlantChain;
use plantchain_client::PointsLedgerClient;

pub const CHAIN_ID: u64 = 31337;
pub const LEDGER: Address = Address::repeat_byte(0x42);

/// Loader for a build without relayer access. Counts attempts.
#[derive(Default)]
pub struct OfflineLoader {
    pub loads: AtomicUsize,
}

#[async_trait]
impl RuntimeLoader for OfflineLoader {
    async fn load(&self) -> Result<Arc<dyn RelayerRuntime>, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(LoadError::Fetch {
            url: "http://relayer.invalid".to_string(),
            reason: "offline".to_string(),
        })
    }
}

pub fn relayer_metadata() -> Value {
    json!({
        "ACLAddress": "0x50157CFfD6bBFA2DECe204a89ec419c23ef5755D",
        "InputVerifierAddress": "0x901F8942346f7AB3a01F6D7613119Bca447Bb030",
        "KMSVerifierAddress": "0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC"
    })
}

/// A local chain shared by every wallet in a scenario.
pub struct LocalChain {
    pub coprocessor: Arc<MockCoprocessor>,
    pub ledger: Arc<MockPlantChain>,
    pub loader: Arc<OfflineLoader>,
    pub factory: Arc<InstanceFactory>,
}

impl LocalChain {
    pub fn new(public_balances: bool) -> Self {
        let coprocessor = Arc::new(MockCoprocessor::new(CHAIN_ID));
        let mut ledger = MockPlantChain::new(LEDGER, coprocessor.clone());
        if public_balances {
            ledger = ledger.with_public_balances();
        }
        let loader = Arc::new(OfflineLoader::default());
        let factory = InstanceFactory::new(
            Arc::new(RuntimeBootstrapper::new(loader.clone())),
            RelayerConfig::sepolia(),
        )
        .with_mock_coprocessor(coprocessor.clone());

        Self {
            coprocessor,
            ledger: Arc::new(ledger),
            loader,
            factory: Arc::new(factory),
        }
    }

    pub fn deployments(&self) -> Deployments {
        Deployments::new().with(CHAIN_ID, LEDGER, "localhost")
    }

    /// Connect a fresh wallet to the chain.
    pub async fn wallet(&self) -> Wallet {
        let transport = Arc::new(
            InMemoryTransport::new(PrivateKeySigner::random(), CHAIN_ID)
                .with_client_version("HardhatNetwork/2.22.0/@ethereumjs/vm/6.4.0")
                .with_relayer_metadata(relayer_metadata()),
        );
        let client = PointsLedgerClient::connect(
            transport.clone(),
            Arc::new(self.ledger.connect(transport.address())),
            self.factory.clone(),
            self.deployments(),
        )
        .await
        .expect("wallet connects");

        Wallet { transport, client }
    }
}

pub struct Wallet {
    pub transport: Arc<InMemoryTransport>,
    pub client: PointsLedgerClient,
}
