// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cryptosystem runtime bootstrap.
//!
//! Two pieces of process-wide state live here: the loaded runtime handle and
//! the "initialized" flag. Both are one-shot. Callers that arrive while a
//! load or init is in flight await that same operation and receive its
//! result, success or failure. A failed attempt leaves the state empty so a
//! later call starts a fresh one.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};

use super::{FhevmBackend, FhevmError, RelayerConfig};

/// Failure to fetch or initialize the cryptosystem runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to fetch runtime assets from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Runtime asset endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed runtime assets: {0}")]
    Malformed(String),

    #[error("Runtime initialization failed: {0}")]
    Init(String),
}

/// Fetches and installs the runtime. Called at most once per successful load.
#[async_trait]
pub trait RuntimeLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn RelayerRuntime>, LoadError>;
}

/// A loaded (but possibly not yet initialized) cryptosystem runtime.
#[async_trait]
pub trait RelayerRuntime: Send + Sync {
    /// Global one-time initialization.
    async fn init_sdk(&self) -> Result<(), LoadError>;

    /// Build an instance for `config`.
    async fn create_instance(
        &self,
        config: &RelayerConfig,
    ) -> Result<Arc<dyn FhevmBackend>, FhevmError>;
}

type Attempt<T> = Shared<BoxFuture<'static, Result<T, LoadError>>>;

/// A value produced by at most one in-flight async attempt at a time.
struct OneShot<T: Clone + Send + Sync + 'static> {
    value: OnceLock<T>,
    in_flight: Mutex<Option<Attempt<T>>>,
}

impl<T: Clone + Send + Sync + 'static> OneShot<T> {
    fn new() -> Self {
        Self {
            value: OnceLock::new(),
            in_flight: Mutex::new(None),
        }
    }

    fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Resolve the value, joining the in-flight attempt or starting one
    /// with `start`.
    async fn get_or_try_init<F>(&self, start: F) -> Result<T, LoadError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, LoadError>>,
    {
        let attempt = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = self.value.get() {
                return Ok(value.clone());
            }
            in_flight.get_or_insert_with(|| start().shared()).clone()
        };

        let result = attempt.clone().await;

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(value) = &result {
            let _ = self.value.set(value.clone());
        }
        if in_flight.as_ref().is_some_and(|current| current.ptr_eq(&attempt)) {
            *in_flight = None;
        }
        result
    }
}

/// Lazily loads and initializes the runtime exactly once.
pub struct RuntimeBootstrapper {
    loader: Arc<dyn RuntimeLoader>,
    runtime: OneShot<Arc<dyn RelayerRuntime>>,
    initialized: OneShot<()>,
}

impl RuntimeBootstrapper {
    pub fn new(loader: Arc<dyn RuntimeLoader>) -> Self {
        Self {
            loader,
            runtime: OneShot::new(),
            initialized: OneShot::new(),
        }
    }

    /// Resolve the runtime handle, loading it on first use.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn RelayerRuntime>, LoadError> {
        self.runtime
            .get_or_try_init(|| {
                let loader = Arc::clone(&self.loader);
                async move {
                    tracing::info!("Loading FHE runtime");
                    let runtime = loader.load().await.inspect_err(|e| {
                        tracing::error!(error = %e, "FHE runtime load failed");
                    })?;
                    tracing::info!("FHE runtime loaded");
                    Ok::<_, LoadError>(runtime)
                }
                .boxed()
            })
            .await
    }

    /// Load the runtime if needed, then run its global init once.
    pub async fn ensure_initialized(&self) -> Result<Arc<dyn RelayerRuntime>, LoadError> {
        let runtime = self.ensure_loaded().await?;
        self.initialized
            .get_or_try_init(|| {
                let runtime = Arc::clone(&runtime);
                async move {
                    runtime.init_sdk().await.inspect_err(|e| {
                        tracing::error!(error = %e, "FHE runtime initialization failed");
                    })?;
                    tracing::info!("FHE runtime initialized");
                    Ok::<_, LoadError>(())
                }
                .boxed()
            })
            .await?;
        Ok(runtime)
    }

    pub fn is_loaded(&self) -> bool {
        self.runtime.get().is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get().is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use std::collections::HashMap;

    use alloy::primitives::{Address, Bytes, U256};

    use crate::fhevm::{
        AuthorizationMessage, CiphertextHandle, CryptosystemMode, DecryptionDomain,
        EncryptedBatch, UserDecryptRequest,
    };

    /// Relay-mode backend whose network operations all fail.
    pub(crate) struct StubRelayBackend {
        pub config: RelayerConfig,
    }

    #[async_trait]
    impl FhevmBackend for StubRelayBackend {
        fn mode(&self) -> CryptosystemMode {
            CryptosystemMode::Relay
        }

        async fn encrypt_u32(
            &self,
            _contract: Address,
            _user: Address,
            _values: &[u32],
        ) -> Result<EncryptedBatch, FhevmError> {
            Err(FhevmError::Relayer("offline".to_string()))
        }

        async fn public_decrypt(
            &self,
            _contract: Address,
            _handle: CiphertextHandle,
        ) -> Result<U256, FhevmError> {
            Err(FhevmError::Relayer("offline".to_string()))
        }

        fn create_eip712(
            &self,
            public_key: &Bytes,
            contracts: &[Address],
            start_timestamp: u64,
            duration_days: u64,
        ) -> AuthorizationMessage {
            AuthorizationMessage::new(
                DecryptionDomain::new(
                    self.config.gateway_chain_id,
                    self.config.verifying_contract_address_decryption,
                ),
                public_key,
                contracts,
                start_timestamp,
                duration_days,
            )
        }

        async fn user_decrypt(
            &self,
            _request: &UserDecryptRequest,
        ) -> Result<HashMap<CiphertextHandle, U256>, FhevmError> {
            Err(FhevmError::Relayer("offline".to_string()))
        }
    }

    /// Runtime double counting global inits and instance creations.
    pub(crate) struct CountingRuntime {
        pub inits: AtomicUsize,
        pub instances: AtomicUsize,
    }

    #[async_trait]
    impl RelayerRuntime for CountingRuntime {
        async fn init_sdk(&self) -> Result<(), LoadError> {
            tokio::task::yield_now().await;
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn create_instance(
            &self,
            config: &RelayerConfig,
        ) -> Result<Arc<dyn FhevmBackend>, FhevmError> {
            self.instances.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubRelayBackend {
                config: config.clone(),
            }))
        }
    }

    /// Loader double counting asset fetches.
    pub(crate) struct CountingLoader {
        pub loads: AtomicUsize,
        pub fail: bool,
        pub runtime: Arc<CountingRuntime>,
    }

    impl CountingLoader {
        pub fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail: false,
                runtime: Arc::new(CountingRuntime {
                    inits: AtomicUsize::new(0),
                    instances: AtomicUsize::new(0),
                }),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl RuntimeLoader for CountingLoader {
        async fn load(&self) -> Result<Arc<dyn RelayerRuntime>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            // Stay in flight long enough for concurrent callers to pile up.
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            if self.fail {
                return Err(LoadError::Fetch {
                    url: "https://cdn.invalid/runtime".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(self.runtime.clone())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_load() {
        let loader = Arc::new(CountingLoader::new());
        let bootstrapper = Arc::new(RuntimeBootstrapper::new(loader.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let bootstrapper = bootstrapper.clone();
            tasks.spawn(async move { bootstrapper.ensure_loaded().await.is_ok() });
        }

        let mut resolved = 0;
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap());
            resolved += 1;
        }

        assert_eq!(resolved, 16);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(bootstrapper.is_loaded());
    }

    /// Loader that stays in flight until released, then fails.
    struct GatedLoader {
        loads: AtomicUsize,
        gate: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl RuntimeLoader for GatedLoader {
        async fn load(&self) -> Result<Arc<dyn RelayerRuntime>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.map_err(|e| LoadError::Fetch {
                url: "https://cdn.invalid/runtime".to_string(),
                reason: e.to_string(),
            })?;
            Err(LoadError::Fetch {
                url: "https://cdn.invalid/runtime".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_load() {
        let loader = Arc::new(GatedLoader {
            loads: AtomicUsize::new(0),
            gate: tokio::sync::Semaphore::new(0),
        });
        let bootstrapper = Arc::new(RuntimeBootstrapper::new(loader.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let bootstrapper = bootstrapper.clone();
            tasks.spawn(async move { bootstrapper.ensure_loaded().await.err() });
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        loader.gate.add_permits(1);
        let mut failed = 0;
        while let Some(result) = tasks.join_next().await {
            assert!(matches!(result.unwrap(), Some(LoadError::Fetch { .. })));
            failed += 1;
        }

        assert_eq!(failed, 8);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(!bootstrapper.is_loaded());

        // The settled failure is not cached; the next call fetches again.
        assert!(bootstrapper.ensure_loaded().await.is_err());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_calls_resolve_immediately() {
        let loader = Arc::new(CountingLoader::new());
        let bootstrapper = RuntimeBootstrapper::new(loader.clone());

        bootstrapper.ensure_loaded().await.unwrap();
        bootstrapper.ensure_loaded().await.unwrap();
        bootstrapper.ensure_loaded().await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_failure_surfaces_and_allows_retry() {
        let loader = Arc::new(CountingLoader::failing());
        let bootstrapper = RuntimeBootstrapper::new(loader.clone());

        let err = bootstrapper.ensure_loaded().await.err().unwrap();
        assert!(matches!(err, LoadError::Fetch { .. }));
        assert!(!bootstrapper.is_loaded());

        assert!(bootstrapper.ensure_loaded().await.is_err());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn global_init_runs_once() {
        let loader = Arc::new(CountingLoader::new());
        let bootstrapper = Arc::new(RuntimeBootstrapper::new(loader.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let bootstrapper = bootstrapper.clone();
            tasks.spawn(async move { bootstrapper.ensure_initialized().await.is_ok() });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap());
        }

        assert_eq!(loader.runtime.inits.load(Ordering::SeqCst), 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(bootstrapper.is_initialized());
    }
}
