// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-use encrypted inputs.
//!
//! An [`EncryptedInput`] is one ciphertext handle plus the proof that it is
//! well formed, bound to a `(contract, user)` pair on one chain. It is
//! meant to be passed straight into the contract call that consumes it.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256};

use super::{CiphertextHandle, FhevmBackend, FhevmError};
use crate::error::ClientError;

const HANDLE_LEN: usize = 32;
const SIGNATURE_LEN: usize = 65;

/// Decoded input proof.
///
/// Wire layout: `[numHandles:u8][numSigners:u8][handles:32*n][signatures:65*m][extraData]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputProof {
    pub handles: Vec<CiphertextHandle>,
    pub signatures: Vec<[u8; SIGNATURE_LEN]>,
    pub extra_data: Bytes,
}

impl InputProof {
    pub fn encode(&self) -> Result<Bytes, FhevmError> {
        let num_handles = u8::try_from(self.handles.len())
            .map_err(|_| FhevmError::Codec("too many handles in one proof".to_string()))?;
        let num_signers = u8::try_from(self.signatures.len())
            .map_err(|_| FhevmError::Codec("too many signers in one proof".to_string()))?;

        let mut out = Vec::with_capacity(
            2 + self.handles.len() * HANDLE_LEN
                + self.signatures.len() * SIGNATURE_LEN
                + self.extra_data.len(),
        );
        out.push(num_handles);
        out.push(num_signers);
        for handle in &self.handles {
            out.extend_from_slice(handle.as_slice());
        }
        for signature in &self.signatures {
            out.extend_from_slice(signature);
        }
        out.extend_from_slice(&self.extra_data);
        Ok(out.into())
    }

    pub fn decode(raw: &[u8]) -> Result<Self, FhevmError> {
        let (&num_handles, rest) = raw
            .split_first()
            .ok_or_else(|| FhevmError::InvalidProof("empty proof".to_string()))?;
        let (&num_signers, rest) = rest
            .split_first()
            .ok_or_else(|| FhevmError::InvalidProof("truncated header".to_string()))?;

        let handles_len = num_handles as usize * HANDLE_LEN;
        let signatures_len = num_signers as usize * SIGNATURE_LEN;
        if rest.len() < handles_len + signatures_len {
            return Err(FhevmError::InvalidProof(format!(
                "expected at least {} bytes after header, got {}",
                handles_len + signatures_len,
                rest.len()
            )));
        }

        let (handle_bytes, rest) = rest.split_at(handles_len);
        let (signature_bytes, extra) = rest.split_at(signatures_len);

        let handles = handle_bytes
            .chunks_exact(HANDLE_LEN)
            .map(B256::from_slice)
            .collect();
        let signatures = signature_bytes
            .chunks_exact(SIGNATURE_LEN)
            .map(|chunk| {
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(chunk);
                signature
            })
            .collect();

        Ok(Self {
            handles,
            signatures,
            extra_data: Bytes::copy_from_slice(extra),
        })
    }
}

/// A ciphertext handle and its proof, scoped to one contract call.
///
/// Not `Clone`: the value is consumed by the call that submits it.
#[derive(PartialEq, Eq)]
pub struct EncryptedInput {
    pub handle: CiphertextHandle,
    pub proof: Bytes,
    pub contract: Address,
    pub user: Address,
    pub chain_id: u64,
}

impl fmt::Debug for EncryptedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedInput")
            .field("handle", &self.handle)
            .field("proof_len", &self.proof.len())
            .field("contract", &self.contract)
            .field("user", &self.user)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Collects exactly one 32-bit operand and encrypts it once.
pub struct EncryptedInputBuilder {
    backend: Arc<dyn FhevmBackend>,
    chain_id: u64,
    contract: Address,
    user: Address,
    values: Vec<u32>,
    consumed: bool,
}

impl EncryptedInputBuilder {
    pub(crate) fn new(
        backend: Arc<dyn FhevmBackend>,
        chain_id: u64,
        contract: Address,
        user: Address,
    ) -> Self {
        Self {
            backend,
            chain_id,
            contract,
            user,
            values: Vec::with_capacity(1),
            consumed: false,
        }
    }

    /// Queue a 32-bit operand.
    pub fn add_u32(&mut self, value: u32) -> &mut Self {
        self.values.push(value);
        self
    }

    /// Encrypt the queued operand.
    ///
    /// Fails with `InputAlreadyEncrypted` once this builder has produced an
    /// input, and with `InvalidInput` unless exactly one operand is queued.
    pub async fn encrypt(&mut self) -> Result<EncryptedInput, ClientError> {
        if self.consumed {
            return Err(ClientError::InputAlreadyEncrypted {
                contract: self.contract,
            });
        }
        if self.values.len() != 1 {
            return Err(ClientError::InvalidInput(format!(
                "expected exactly one operand, got {}",
                self.values.len()
            )));
        }

        let batch = self
            .backend
            .encrypt_u32(self.contract, self.user, &self.values)
            .await?;

        let handle = match batch.handles.as_slice() {
            [handle] => *handle,
            other => {
                return Err(ClientError::InvalidInput(format!(
                    "backend returned {} handles for one operand",
                    other.len()
                )))
            }
        };
        if batch.input_proof.is_empty() {
            return Err(ClientError::InvalidInput("backend returned an empty proof".to_string()));
        }

        self.consumed = true;
        tracing::debug!(
            contract = %self.contract,
            user = %self.user,
            chain_id = self.chain_id,
            handle = %handle,
            "Encrypted input created"
        );

        Ok(EncryptedInput {
            handle,
            proof: batch.input_proof,
            contract: self.contract,
            user: self.user,
            chain_id: self.chain_id,
        })
    }
}
