// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-chain confidential instances.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy::primitives::Address;
use lru::LruCache;

use super::detect::{detect_mode, NetworkMode};
use super::input::EncryptedInputBuilder;
use super::mock::{MockCoprocessor, MockFhevm};
use super::runtime::RuntimeBootstrapper;
use super::{CryptosystemMode, FhevmBackend, RelayerConfig};
use crate::blockchain::WalletTransport;
use crate::error::ClientError;

/// Chains kept warm at once.
const INSTANCE_CACHE_CAPACITY: usize = 4;

/// An initialized cryptosystem bound to one chain.
pub struct ConfidentialInstance {
    chain_id: u64,
    rpc_endpoint: String,
    /// True when the global runtime init ran for this instance (relay mode).
    initialized: bool,
    backend: Arc<dyn FhevmBackend>,
}

impl ConfidentialInstance {
    pub fn new(
        chain_id: u64,
        rpc_endpoint: impl Into<String>,
        initialized: bool,
        backend: Arc<dyn FhevmBackend>,
    ) -> Self {
        Self {
            chain_id,
            rpc_endpoint: rpc_endpoint.into(),
            initialized,
            backend,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn rpc_endpoint(&self) -> &str {
        &self.rpc_endpoint
    }

    pub fn mode(&self) -> CryptosystemMode {
        self.backend.mode()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn backend(&self) -> &Arc<dyn FhevmBackend> {
        &self.backend
    }

    /// Start a single-use encrypted input scoped to `(contract, user)`.
    pub fn create_encrypted_input(&self, contract: Address, user: Address) -> EncryptedInputBuilder {
        EncryptedInputBuilder::new(self.backend.clone(), self.chain_id, contract, user)
    }
}

impl std::fmt::Debug for ConfidentialInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidentialInstance")
            .field("chain_id", &self.chain_id)
            .field("rpc_endpoint", &self.rpc_endpoint)
            .field("mode", &self.mode())
            .field("initialized", &self.initialized)
            .finish()
    }
}

/// Builds and caches [`ConfidentialInstance`]s, one per chain id.
pub struct InstanceFactory {
    bootstrapper: Arc<RuntimeBootstrapper>,
    relay: RelayerConfig,
    coprocessors: Mutex<HashMap<u64, Arc<MockCoprocessor>>>,
    instances: Mutex<LruCache<u64, Arc<ConfidentialInstance>>>,
}

impl InstanceFactory {
    pub fn new(bootstrapper: Arc<RuntimeBootstrapper>, relay: RelayerConfig) -> Self {
        Self {
            bootstrapper,
            relay,
            coprocessors: Mutex::new(HashMap::new()),
            instances: Mutex::new(LruCache::new(
                NonZeroUsize::new(INSTANCE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Use `coprocessor` for mock instances on its chain.
    ///
    /// Lets an in-process ledger double and the client share one
    /// ciphertext table.
    pub fn with_mock_coprocessor(self, coprocessor: Arc<MockCoprocessor>) -> Self {
        self.coprocessors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coprocessor.chain_id(), coprocessor);
        self
    }

    pub fn bootstrapper(&self) -> &Arc<RuntimeBootstrapper> {
        &self.bootstrapper
    }

    fn instances(&self) -> MutexGuard<'_, LruCache<u64, Arc<ConfidentialInstance>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mock_coprocessor(&self, chain_id: u64) -> Arc<MockCoprocessor> {
        self.coprocessors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chain_id)
            .or_insert_with(|| Arc::new(MockCoprocessor::new(chain_id)))
            .clone()
    }

    /// Cached instance for `chain_id`, if one is live.
    pub fn cached(&self, chain_id: u64) -> Option<Arc<ConfidentialInstance>> {
        self.instances().get(&chain_id).cloned()
    }

    /// Drop the instance for `chain_id` so the next call rebuilds it.
    pub fn forget(&self, chain_id: u64) {
        self.instances().pop(&chain_id);
    }

    /// Instance for the transport's active chain.
    ///
    /// Detection runs on the first call per chain. Relay mode loads and
    /// initializes the shared runtime, which happens once per bootstrapper
    /// regardless of how many instances are built.
    pub async fn create_instance<T: WalletTransport + ?Sized>(
        &self,
        transport: &T,
    ) -> Result<Arc<ConfidentialInstance>, ClientError> {
        let chain_id = transport.chain_id().await?;
        if let Some(instance) = self.cached(chain_id) {
            return Ok(instance);
        }

        let instance = match detect_mode(transport, &self.relay).await {
            NetworkMode::Mock(config) => {
                let coprocessor = self.mock_coprocessor(config.chain_id);
                let rpc_endpoint = config.rpc_url.clone();
                let backend = MockFhevm::new(config, coprocessor);
                ConfidentialInstance::new(chain_id, rpc_endpoint, false, Arc::new(backend))
            }
            NetworkMode::Relay(config) => {
                let runtime = self.bootstrapper.ensure_initialized().await?;
                let config = config.with_network(transport.rpc_url());
                let backend = runtime.create_instance(&config).await?;
                ConfidentialInstance::new(chain_id, transport.rpc_url(), true, backend)
            }
        };

        tracing::info!(chain_id, mode = %instance.mode(), "Confidential instance created");

        let instance = Arc::new(instance);
        self.instances().put(chain_id, instance.clone());
        Ok(instance)
    }
}
