// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deterministic in-process cryptosystem for local development chains.
//!
//! No homomorphic math happens here. "Ciphertexts" are handles into a
//! cleartext table owned by [`MockCoprocessor`], and the access rules the
//! real co-processor enforces (input proofs, ACL grants, public
//! decryptability, signed user decryption) are checked against that table.
//! The same coprocessor is shared with the in-memory ledger double so both
//! sides of a transaction see one state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::{
    primitives::{keccak256, Address, Bytes, Signature, B256, U256},
    signers::{local::PrivateKeySigner, SignerSync},
};
use async_trait::async_trait;

use super::eip712::{unix_now, AuthorizationMessage, DecryptionDomain};
use super::input::InputProof;
use super::{
    CiphertextHandle, CryptosystemMode, EncryptedBatch, FhevmBackend, FhevmError, MockConfig,
    UserDecryptRequest,
};

/// Handle type byte for `euint32`.
const EUINT32_TYPE: u8 = 4;

#[derive(Default)]
struct CoprocessorState {
    values: HashMap<CiphertextHandle, u32>,
    acl: HashSet<(CiphertextHandle, Address)>,
    public: HashSet<CiphertextHandle>,
    consumed_proofs: HashSet<B256>,
    nonce: u64,
}

impl CoprocessorState {
    fn next_handle(&mut self, seed: &[u8]) -> CiphertextHandle {
        self.nonce += 1;
        let mut preimage = Vec::with_capacity(seed.len() + 8);
        preimage.extend_from_slice(seed);
        preimage.extend_from_slice(&self.nonce.to_be_bytes());
        let mut handle = keccak256(&preimage);
        handle.0[30] = EUINT32_TYPE;
        handle.0[31] = 0;
        handle
    }
}

/// Cleartext-backed stand-in for the FHE co-processor.
pub struct MockCoprocessor {
    chain_id: u64,
    signer: PrivateKeySigner,
    state: Mutex<CoprocessorState>,
}

impl MockCoprocessor {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            signer: PrivateKeySigner::random(),
            state: Mutex::new(CoprocessorState::default()),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address that signs input proofs.
    pub fn verifier(&self) -> Address {
        self.signer.address()
    }

    fn state(&self) -> MutexGuard<'_, CoprocessorState> {
        // A poisoned lock only means a test panicked mid-update; the table
        // itself is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn proof_digest(chain_id: u64, contract: Address, user: Address, handles: &[CiphertextHandle]) -> B256 {
        let mut preimage = Vec::with_capacity(handles.len() * 32 + 48);
        for handle in handles {
            preimage.extend_from_slice(handle.as_slice());
        }
        preimage.extend_from_slice(contract.as_slice());
        preimage.extend_from_slice(user.as_slice());
        preimage.extend_from_slice(&chain_id.to_be_bytes());
        keccak256(&preimage)
    }

    /// Encrypt `values` for `(contract, user)` and sign the resulting proof.
    pub fn encrypt_u32(
        &self,
        chain_id: u64,
        contract: Address,
        user: Address,
        values: &[u32],
    ) -> Result<EncryptedBatch, FhevmError> {
        let handles: Vec<CiphertextHandle> = {
            let mut state = self.state();
            values
                .iter()
                .map(|value| {
                    let mut seed = Vec::with_capacity(52);
                    seed.extend_from_slice(contract.as_slice());
                    seed.extend_from_slice(user.as_slice());
                    seed.extend_from_slice(&chain_id.to_be_bytes());
                    let handle = state.next_handle(&seed);
                    state.values.insert(handle, *value);
                    handle
                })
                .collect()
        };

        let digest = Self::proof_digest(chain_id, contract, user, &handles);
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .map_err(|e| FhevmError::Codec(e.to_string()))?;

        let input_proof = InputProof {
            handles: handles.clone(),
            signatures: vec![signature.as_bytes()],
            extra_data: Bytes::new(),
        }
        .encode()?;

        Ok(EncryptedBatch {
            handles,
            input_proof,
        })
    }

    /// Check an input proof the way the on-chain verifier does and consume it.
    ///
    /// The proof must cover `handle`, be signed for this exact
    /// `(chain, contract, user)` scope and not have been used before.
    pub fn verify_input(
        &self,
        chain_id: u64,
        contract: Address,
        user: Address,
        handle: CiphertextHandle,
        proof: &[u8],
    ) -> Result<CiphertextHandle, FhevmError> {
        let decoded = InputProof::decode(proof)?;
        if !decoded.handles.contains(&handle) {
            return Err(FhevmError::InvalidProof("handle not covered by proof".to_string()));
        }

        let digest = Self::proof_digest(chain_id, contract, user, &decoded.handles);
        let signed_by_verifier = decoded.signatures.iter().any(|raw| {
            Signature::try_from(raw.as_slice())
                .and_then(|signature| signature.recover_address_from_prehash(&digest))
                .map(|signer| signer == self.verifier())
                .unwrap_or(false)
        });
        if !signed_by_verifier {
            return Err(FhevmError::InvalidProof(
                "proof not signed for this contract, user and chain".to_string(),
            ));
        }

        let mut state = self.state();
        if !state.values.contains_key(&handle) {
            return Err(FhevmError::UnknownHandle(handle));
        }
        if !state.consumed_proofs.insert(keccak256(proof)) {
            return Err(FhevmError::InvalidProof("proof already consumed".to_string()));
        }
        Ok(handle)
    }

    /// Handle holding a public constant.
    pub fn trivial_encrypt(&self, value: u32) -> CiphertextHandle {
        let mut state = self.state();
        let handle = state.next_handle(b"trivial");
        state.values.insert(handle, value);
        handle
    }

    /// Fresh handle holding `lhs + rhs` (wrapping, as `euint32` does).
    pub fn add(&self, lhs: CiphertextHandle, rhs: CiphertextHandle) -> Result<CiphertextHandle, FhevmError> {
        let mut state = self.state();
        let lhs_value = *state.values.get(&lhs).ok_or(FhevmError::UnknownHandle(lhs))?;
        let rhs_value = *state.values.get(&rhs).ok_or(FhevmError::UnknownHandle(rhs))?;
        let handle = state.next_handle(b"add");
        state.values.insert(handle, lhs_value.wrapping_add(rhs_value));
        Ok(handle)
    }

    pub fn allow(&self, handle: CiphertextHandle, account: Address) {
        self.state().acl.insert((handle, account));
    }

    pub fn is_allowed(&self, handle: CiphertextHandle, account: Address) -> bool {
        self.state().acl.contains(&(handle, account))
    }

    pub fn make_publicly_decryptable(&self, handle: CiphertextHandle) {
        self.state().public.insert(handle);
    }

    /// Cleartext of a publicly decryptable handle.
    pub fn public_decrypt(&self, handle: CiphertextHandle) -> Result<U256, FhevmError> {
        let state = self.state();
        let value = state.values.get(&handle).ok_or(FhevmError::UnknownHandle(handle))?;
        if !state.public.contains(&handle) {
            return Err(FhevmError::AccessDenied(handle));
        }
        Ok(U256::from(*value))
    }

    /// Cleartext for `user` through `contract`; both must hold an ACL grant.
    pub fn user_decrypt(
        &self,
        handle: CiphertextHandle,
        user: Address,
        contract: Address,
    ) -> Result<U256, FhevmError> {
        let state = self.state();
        let value = state.values.get(&handle).ok_or(FhevmError::UnknownHandle(handle))?;
        if !state.acl.contains(&(handle, user)) || !state.acl.contains(&(handle, contract)) {
            return Err(FhevmError::AccessDenied(handle));
        }
        Ok(U256::from(*value))
    }
}

/// [`FhevmBackend`] over a [`MockCoprocessor`].
pub struct MockFhevm {
    config: MockConfig,
    coprocessor: Arc<MockCoprocessor>,
}

impl MockFhevm {
    pub fn new(config: MockConfig, coprocessor: Arc<MockCoprocessor>) -> Self {
        Self {
            config,
            coprocessor,
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    fn domain(&self) -> DecryptionDomain {
        DecryptionDomain::new(self.config.chain_id, self.config.metadata.kms_verifier_address)
    }
}

#[cfg(test)]
impl MockFhevm {
    pub(crate) fn for_tests(coprocessor: Arc<MockCoprocessor>) -> Self {
        use super::RelayerMetadata;

        let config = MockConfig {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: coprocessor.chain_id(),
            metadata: RelayerMetadata {
                acl_address: Address::repeat_byte(0xac),
                input_verifier_address: Address::repeat_byte(0x1f),
                kms_verifier_address: Address::repeat_byte(0x4b),
            },
        };
        Self::new(config, coprocessor)
    }
}

#[async_trait]
impl FhevmBackend for MockFhevm {
    fn mode(&self) -> CryptosystemMode {
        CryptosystemMode::Mock
    }

    async fn encrypt_u32(
        &self,
        contract: Address,
        user: Address,
        values: &[u32],
    ) -> Result<EncryptedBatch, FhevmError> {
        self.coprocessor
            .encrypt_u32(self.config.chain_id, contract, user, values)
    }

    async fn public_decrypt(
        &self,
        _contract: Address,
        handle: CiphertextHandle,
    ) -> Result<U256, FhevmError> {
        self.coprocessor.public_decrypt(handle)
    }

    fn create_eip712(
        &self,
        public_key: &Bytes,
        contracts: &[Address],
        start_timestamp: u64,
        duration_days: u64,
    ) -> AuthorizationMessage {
        AuthorizationMessage::new(
            self.domain(),
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
        let message = self.create_eip712(
            &request.keypair.public_key,
            &request.contract_addresses,
            request.start_timestamp,
            request.duration_days,
        );
        let signature = Signature::try_from(request.signature.as_ref())
            .map_err(|e| FhevmError::SignatureRejected(e.to_string()))?;

        if !message.verify(&signature, request.user_address) {
            return Err(FhevmError::SignatureRejected(
                "signature does not match the authorization document".to_string(),
            ));
        }
        let now = unix_now();
        if !message.is_valid_at(now) {
            return Err(FhevmError::AuthorizationExpired { now });
        }
        if !request.keypair.is_consistent() {
            return Err(FhevmError::SignatureRejected(
                "keypair halves do not match".to_string(),
            ));
        }

        let mut results = HashMap::with_capacity(request.pairs.len());
        for pair in &request.pairs {
            if !request.contract_addresses.contains(&pair.contract_address) {
                return Err(FhevmError::SignatureRejected(format!(
                    "contract {} not covered by the authorization",
                    pair.contract_address
                )));
            }
            let value =
                self.coprocessor
                    .user_decrypt(pair.handle, request.user_address, pair.contract_address)?;
            results.insert(pair.handle, value);
        }
        Ok(results)
    }
}
