// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Production relayer runtime over HTTP.
//!
//! The relayer brokers everything the client cannot do locally: it verifies
//! encrypted inputs and co-signs their proofs, serves public decryptions and
//! forwards signed user decryptions to the KMS. Homomorphic packing and
//! KMS share reconstruction stay behind [`FheCodec`].
//!
//! Endpoints:
//! - `GET  /v1/keyurl` - locations of the network public key and CRS
//! - `POST /v1/input-proof`
//! - `POST /v1/public-decrypt` (HTTP 403 when the handle is not public)
//! - `POST /v1/user-decrypt`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::{
    hex,
    primitives::{Address, Bytes, B256, U256},
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use super::eip712::{AuthorizationMessage, DecryptionDomain, DecryptionKeypair};
use super::input::InputProof;
use super::runtime::{LoadError, RelayerRuntime, RuntimeLoader};
use super::{
    CiphertextHandle, CryptosystemMode, EncryptedBatch, FhevmBackend, FhevmError,
    HandleContractPair, RelayerConfig, UserDecryptRequest,
};

/// CRS size used for 32-bit operands.
const CRS_BITS: &str = "2048";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Network key material fetched once per process.
#[derive(Clone)]
pub struct KeyMaterial {
    pub public_key_id: String,
    pub public_key: Bytes,
    pub crs_id: String,
    pub crs: Bytes,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key_id", &self.public_key_id)
            .field("public_key_len", &self.public_key.len())
            .field("crs_id", &self.crs_id)
            .field("crs_len", &self.crs.len())
            .finish()
    }
}

/// One KMS share of a user decryption, re-encrypted under the caller's key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecryptionShare {
    pub payload: Bytes,
    pub signature: Bytes,
}

/// The homomorphic math, supplied by the embedding application.
pub trait FheCodec: Send + Sync {
    /// Install the network key material.
    fn init(&self, material: &KeyMaterial) -> Result<(), FhevmError>;

    /// Encrypt `values` with a proof of knowledge bound to the given scope.
    fn encrypt_u32(
        &self,
        values: &[u32],
        contract: Address,
        user: Address,
        config: &RelayerConfig,
    ) -> Result<Bytes, FhevmError>;

    /// Combine KMS shares into cleartexts using the request's private key.
    fn reconstruct(
        &self,
        shares: &[DecryptionShare],
        keypair: &DecryptionKeypair,
        pairs: &[HandleContractPair],
    ) -> Result<HashMap<CiphertextHandle, U256>, FhevmError>;
}

/// Codec for builds that link no FHE implementation.
///
/// Relay-mode initialization fails with a clear error; mock mode is
/// unaffected.
pub struct MissingCodec;

impl MissingCodec {
    fn unavailable() -> FhevmError {
        FhevmError::Codec("no FHE codec is linked into this build".to_string())
    }
}

impl FheCodec for MissingCodec {
    fn init(&self, _material: &KeyMaterial) -> Result<(), FhevmError> {
        Err(Self::unavailable())
    }

    fn encrypt_u32(
        &self,
        _values: &[u32],
        _contract: Address,
        _user: Address,
        _config: &RelayerConfig,
    ) -> Result<Bytes, FhevmError> {
        Err(Self::unavailable())
    }

    fn reconstruct(
        &self,
        _shares: &[DecryptionShare],
        _keypair: &DecryptionKeypair,
        _pairs: &[HandleContractPair],
    ) -> Result<HashMap<CiphertextHandle, U256>, FhevmError> {
        Err(Self::unavailable())
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Deserialize)]
struct KeyRef {
    data_id: String,
    urls: Vec<String>,
}

#[derive(Deserialize)]
struct FheKeyInfo {
    fhe_public_key: KeyRef,
}

#[derive(Deserialize)]
struct KeyUrlBody {
    fhe_key_info: Vec<FheKeyInfo>,
    crs: HashMap<String, KeyRef>,
}

#[derive(Deserialize)]
struct InputProofBody {
    handles: Vec<B256>,
    signatures: Vec<Bytes>,
}

#[derive(Deserialize)]
struct PublicDecryption {
    decrypted_value: Bytes,
}

fn http_client() -> Result<Client, String> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Fetches key material from the relayer and yields an [`HttpRelayerRuntime`].
pub struct HttpRuntimeLoader {
    http: Client,
    relayer_url: String,
    codec: Arc<dyn FheCodec>,
}

impl HttpRuntimeLoader {
    pub fn new(relayer_url: impl Into<String>, codec: Arc<dyn FheCodec>) -> Result<Self, LoadError> {
        Ok(Self {
            http: http_client().map_err(LoadError::Init)?,
            relayer_url: relayer_url.into(),
            codec,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Response, LoadError> {
        let response = self.http.get(url).send().await.map_err(|e| LoadError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(LoadError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    async fn fetch_bytes(&self, key: &KeyRef) -> Result<Bytes, LoadError> {
        let url = key
            .urls
            .first()
            .ok_or_else(|| LoadError::Malformed(format!("no download URL for {}", key.data_id)))?;
        let body = self.fetch(url).await?.bytes().await.map_err(|e| LoadError::Fetch {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Bytes::from(body.to_vec()))
    }
}

#[async_trait]
impl RuntimeLoader for HttpRuntimeLoader {
    async fn load(&self) -> Result<Arc<dyn RelayerRuntime>, LoadError> {
        let url = endpoint(&self.relayer_url, "/v1/keyurl");
        let keyurl: Envelope<KeyUrlBody> = self
            .fetch(&url)
            .await?
            .json()
            .await
            .map_err(|e| LoadError::Malformed(format!("GET {url} invalid JSON: {e}")))?;

        let public_key_ref = keyurl
            .response
            .fhe_key_info
            .first()
            .map(|info| &info.fhe_public_key)
            .ok_or_else(|| LoadError::Malformed("no FHE public key listed".to_string()))?;
        let crs_ref = keyurl
            .response
            .crs
            .get(CRS_BITS)
            .ok_or_else(|| LoadError::Malformed(format!("no {CRS_BITS}-bit CRS listed")))?;

        let material = KeyMaterial {
            public_key_id: public_key_ref.data_id.clone(),
            public_key: self.fetch_bytes(public_key_ref).await?,
            crs_id: crs_ref.data_id.clone(),
            crs: self.fetch_bytes(crs_ref).await?,
        };
        tracing::debug!(?material, "Fetched relayer key material");

        Ok(Arc::new(HttpRelayerRuntime {
            http: self.http.clone(),
            codec: self.codec.clone(),
            material,
        }))
    }
}

/// Loaded relayer runtime holding the network key material.
pub struct HttpRelayerRuntime {
    http: Client,
    codec: Arc<dyn FheCodec>,
    material: KeyMaterial,
}

#[async_trait]
impl RelayerRuntime for HttpRelayerRuntime {
    async fn init_sdk(&self) -> Result<(), LoadError> {
        self.codec
            .init(&self.material)
            .map_err(|e| LoadError::Init(e.to_string()))
    }

    async fn create_instance(
        &self,
        config: &RelayerConfig,
    ) -> Result<Arc<dyn FhevmBackend>, FhevmError> {
        Ok(Arc::new(RelayerInstance {
            http: self.http.clone(),
            codec: self.codec.clone(),
            config: config.clone(),
        }))
    }
}

/// [`FhevmBackend`] talking to the relayer.
pub struct RelayerInstance {
    http: Client,
    codec: Arc<dyn FheCodec>,
    config: RelayerConfig,
}

impl RelayerInstance {
    async fn post(&self, path: &str, payload: &Value) -> Result<Response, FhevmError> {
        self.http
            .post(endpoint(&self.config.relayer_url, path))
            .json(payload)
            .send()
            .await
            .map_err(|e| FhevmError::Relayer(format!("POST {path} failed: {e}")))
    }

    async fn read<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, FhevmError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FhevmError::RelayerStatus {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| FhevmError::Relayer(format!("POST {path} invalid JSON: {e}")))?;
        Ok(envelope.response)
    }
}

#[async_trait]
impl FhevmBackend for RelayerInstance {
    fn mode(&self) -> CryptosystemMode {
        CryptosystemMode::Relay
    }

    async fn encrypt_u32(
        &self,
        contract: Address,
        user: Address,
        values: &[u32],
    ) -> Result<EncryptedBatch, FhevmError> {
        let ciphertext = self.codec.encrypt_u32(values, contract, user, &self.config)?;
        let payload = json!({
            "contractAddress": contract,
            "userAddress": user,
            "ciphertextWithInputVerification": hex::encode(&ciphertext),
            "contractChainId": format!("{:#x}", self.config.chain_id),
            "extraData": "0x00",
        });

        let path = "/v1/input-proof";
        let body: InputProofBody = Self::read(path, self.post(path, &payload).await?).await?;
        if body.handles.len() != values.len() {
            return Err(FhevmError::InvalidProof(format!(
                "relayer returned {} handles for {} values",
                body.handles.len(),
                values.len()
            )));
        }

        let signatures = body
            .signatures
            .iter()
            .map(|raw| {
                <[u8; 65]>::try_from(raw.as_ref()).map_err(|_| {
                    FhevmError::InvalidProof(format!("coprocessor signature of {} bytes", raw.len()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let input_proof = InputProof {
            handles: body.handles.clone(),
            signatures,
            extra_data: Bytes::from_static(&[0x00]),
        }
        .encode()?;

        Ok(EncryptedBatch {
            handles: body.handles,
            input_proof,
        })
    }

    async fn public_decrypt(
        &self,
        _contract: Address,
        handle: CiphertextHandle,
    ) -> Result<U256, FhevmError> {
        let path = "/v1/public-decrypt";
        let payload = json!({
            "ciphertextHandles": [handle],
            "extraData": "0x00",
        });
        let response = self.post(path, &payload).await?;
        if response.status() == StatusCode::FORBIDDEN {
            return Err(FhevmError::AccessDenied(handle));
        }

        let results: Vec<PublicDecryption> = Self::read(path, response).await?;
        let decrypted = results
            .first()
            .map(|result| &result.decrypted_value)
            .ok_or(FhevmError::UnknownHandle(handle))?;
        // ABI-encoded cleartexts, one 32-byte word per requested handle.
        let word = decrypted
            .get(..32)
            .ok_or_else(|| FhevmError::Codec("decrypted value shorter than one word".to_string()))?;
        Ok(U256::from_be_slice(word))
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
        request: &UserDecryptRequest,
    ) -> Result<HashMap<CiphertextHandle, U256>, FhevmError> {
        let path = "/v1/user-decrypt";
        let payload = json!({
            "handleContractPairs": request.pairs,
            "requestValidity": {
                "startTimestamp": request.start_timestamp.to_string(),
                "durationDays": request.duration_days.to_string(),
            },
            "contractsChainId": self.config.chain_id.to_string(),
            "contractAddresses": request.contract_addresses,
            "userAddress": request.user_address,
            "signature": hex::encode(&request.signature),
            "publicKey": hex::encode(&request.keypair.public_key),
            "extraData": "0x00",
        });

        let shares: Vec<DecryptionShare> = Self::read(path, self.post(path, &payload).await?).await?;
        if shares.is_empty() {
            return Err(FhevmError::Relayer("relayer returned no KMS shares".to_string()));
        }
        self.codec.reconstruct(&shares, &request.keypair, &request.pairs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        extract::State,
        http::StatusCode as AxumStatus,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use tokio::net::TcpListener;

    use super::*;
    use crate::fhevm::eip712::DEFAULT_VALIDITY_DAYS;

    /// Codec that "encrypts" to big-endian bytes and reads shares back the same way.
    #[derive(Default)]
    struct PlainCodec {
        inits: AtomicUsize,
    }

    impl FheCodec for PlainCodec {
        fn init(&self, material: &KeyMaterial) -> Result<(), FhevmError> {
            assert_eq!(material.public_key.as_ref(), b"public-key");
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn encrypt_u32(
            &self,
            values: &[u32],
            _contract: Address,
            _user: Address,
            _config: &RelayerConfig,
        ) -> Result<Bytes, FhevmError> {
            Ok(values.iter().flat_map(|v| v.to_be_bytes()).collect())
        }

        fn reconstruct(
            &self,
            shares: &[DecryptionShare],
            _keypair: &DecryptionKeypair,
            pairs: &[HandleContractPair],
        ) -> Result<HashMap<CiphertextHandle, U256>, FhevmError> {
            let payload = &shares[0].payload;
            Ok(pairs
                .iter()
                .zip(payload.chunks_exact(32))
                .map(|(pair, word)| (pair.handle, U256::from_be_slice(word)))
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeRelayer {
        base_url: String,
        keyurl_hits: AtomicUsize,
        asset_hits: AtomicUsize,
        deny_public: bool,
    }

    async fn keyurl(State(relayer): State<Arc<FakeRelayer>>) -> Json<Value> {
        relayer.keyurl_hits.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "response": {
                "fhe_key_info": [{
                    "fhe_public_key": {
                        "data_id": "pk-1",
                        "urls": [format!("{}/assets/public-key", relayer.base_url)]
                    }
                }],
                "crs": {
                    "2048": {
                        "data_id": "crs-1",
                        "urls": [format!("{}/assets/crs", relayer.base_url)]
                    }
                }
            }
        }))
    }

    async fn public_key(State(relayer): State<Arc<FakeRelayer>>) -> Vec<u8> {
        relayer.asset_hits.fetch_add(1, Ordering::SeqCst);
        b"public-key".to_vec()
    }

    async fn crs(State(relayer): State<Arc<FakeRelayer>>) -> Vec<u8> {
        relayer.asset_hits.fetch_add(1, Ordering::SeqCst);
        b"crs".to_vec()
    }

    async fn input_proof(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["contractChainId"], "0xaa36a7");
        assert_eq!(body["ciphertextWithInputVerification"], "00000001");
        Json(json!({
            "response": {
                "handles": [format!("0x{}", "ab".repeat(32))],
                "signatures": [format!("0x{}", "cd".repeat(65))]
            }
        }))
    }

    async fn public_decrypt(State(relayer): State<Arc<FakeRelayer>>) -> impl IntoResponse {
        if relayer.deny_public {
            return (
                AxumStatus::FORBIDDEN,
                Json(json!({ "message": "not allowed for public decryption" })),
            );
        }
        (
            AxumStatus::OK,
            Json(json!({
                "response": [{
                    "decrypted_value": format!("0x{:064x}", 2),
                    "signatures": []
                }]
            })),
        )
    }

    async fn user_decrypt(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["requestValidity"]["durationDays"], "365");
        assert_eq!(body["contractsChainId"], "11155111");
        assert!(!body["signature"].as_str().unwrap().starts_with("0x"));
        Json(json!({
            "response": [{
                "payload": format!("0x{:064x}", 3),
                "signature": "0x00"
            }]
        }))
    }

    async fn spawn_relayer(deny_public: bool) -> Arc<FakeRelayer> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relayer = Arc::new(FakeRelayer {
            base_url: format!("http://{}", listener.local_addr().unwrap()),
            deny_public,
            ..Default::default()
        });

        let app = Router::new()
            .route("/v1/keyurl", get(keyurl))
            .route("/assets/public-key", get(public_key))
            .route("/assets/crs", get(crs))
            .route("/v1/input-proof", post(input_proof))
            .route("/v1/public-decrypt", post(public_decrypt))
            .route("/v1/user-decrypt", post(user_decrypt))
            .with_state(relayer.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        relayer
    }

    fn instance(relayer: &FakeRelayer) -> RelayerInstance {
        RelayerInstance {
            http: Client::new(),
            codec: Arc::new(PlainCodec::default()),
            config: RelayerConfig::sepolia().with_relayer_url(relayer.base_url.clone()),
        }
    }

    #[tokio::test]
    async fn loader_fetches_key_material_and_initializes_codec() {
        let relayer = spawn_relayer(false).await;
        let codec = Arc::new(PlainCodec::default());
        let loader = HttpRuntimeLoader::new(relayer.base_url.clone(), codec.clone()).unwrap();

        let runtime = loader.load().await.unwrap();
        runtime.init_sdk().await.unwrap();

        assert_eq!(relayer.keyurl_hits.load(Ordering::SeqCst), 1);
        assert_eq!(relayer.asset_hits.load(Ordering::SeqCst), 2);
        assert_eq!(codec.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_codec_fails_initialization() {
        let relayer = spawn_relayer(false).await;
        let loader = HttpRuntimeLoader::new(relayer.base_url.clone(), Arc::new(MissingCodec)).unwrap();
        let runtime = loader.load().await.unwrap();
        assert!(matches!(runtime.init_sdk().await, Err(LoadError::Init(_))));
    }

    #[tokio::test]
    async fn unreachable_relayer_is_a_load_error() {
        let loader =
            HttpRuntimeLoader::new("http://127.0.0.1:9", Arc::new(PlainCodec::default())).unwrap();
        let err = loader.load().await.err().unwrap();
        assert!(matches!(err, LoadError::Fetch { .. }));
    }

    #[tokio::test]
    async fn input_proof_is_packed_from_relayer_response() {
        let relayer = spawn_relayer(false).await;
        let batch = instance(&relayer)
            .encrypt_u32(Address::repeat_byte(0x11), Address::repeat_byte(0x22), &[1])
            .await
            .unwrap();

        assert_eq!(batch.handles, vec![B256::repeat_byte(0xab)]);
        let proof = InputProof::decode(&batch.input_proof).unwrap();
        assert_eq!(proof.signatures, vec![[0xcd; 65]]);
        assert_eq!(proof.extra_data.as_ref(), &[0x00]);
    }

    #[tokio::test]
    async fn forbidden_public_decrypt_is_access_denied() {
        let relayer = spawn_relayer(true).await;
        let handle = B256::repeat_byte(0x01);
        let err = instance(&relayer)
            .public_decrypt(Address::repeat_byte(0x11), handle)
            .await
            .unwrap_err();
        assert!(matches!(err, FhevmError::AccessDenied(h) if h == handle));
    }

    #[tokio::test]
    async fn public_decrypt_reads_first_word() {
        let relayer = spawn_relayer(false).await;
        let value = instance(&relayer)
            .public_decrypt(Address::repeat_byte(0x11), B256::repeat_byte(0x01))
            .await
            .unwrap();
        assert_eq!(value, U256::from(2));
    }

    #[tokio::test]
    async fn user_decrypt_reconstructs_shares() {
        let relayer = spawn_relayer(false).await;
        let handle = B256::repeat_byte(0x01);
        let contract = Address::repeat_byte(0x11);
        let request = UserDecryptRequest {
            pairs: vec![HandleContractPair {
                handle,
                contract_address: contract,
            }],
            keypair: DecryptionKeypair::generate(),
            signature: Bytes::from_static(&[0x1b; 65]),
            contract_addresses: vec![contract],
            user_address: Address::repeat_byte(0x22),
            start_timestamp: 1_700_000_000,
            duration_days: DEFAULT_VALIDITY_DAYS,
        };

        let results = instance(&relayer).user_decrypt(&request).await.unwrap();
        assert_eq!(results[&handle], U256::from(3));
    }
}
