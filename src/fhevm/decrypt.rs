// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Public and user decryption.
//!
//! The two paths are never chained. Public decryption has no user-visible
//! side effect and fails with a distinct `AccessDenied` when the ledger's
//! policy keeps the value private; user decryption prompts the wallet for a
//! typed-data signature and is only ever started by an explicit caller
//! action.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use uuid::Uuid;

use super::instance::ConfidentialInstance;
use super::{CiphertextHandle, FhevmError, HandleContractPair, UserDecryptRequest};
use crate::blockchain::{TransportError, WalletTransport};
use crate::error::{ClientError, UserDecryptStep};

/// Decrypts ledger handles through one confidential instance.
pub struct DecryptionCoordinator {
    instance: Arc<ConfidentialInstance>,
}

impl DecryptionCoordinator {
    pub fn new(instance: Arc<ConfidentialInstance>) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &Arc<ConfidentialInstance> {
        &self.instance
    }

    /// Decrypt a publicly readable handle.
    ///
    /// A policy refusal is returned as [`ClientError::AccessDenied`] and is
    /// not retried here.
    pub async fn public_decrypt(
        &self,
        contract: Address,
        handle: CiphertextHandle,
    ) -> Result<U256, ClientError> {
        match self.instance.backend().public_decrypt(contract, handle).await {
            Ok(value) => {
                tracing::debug!(contract = %contract, handle = %handle, "Public decryption succeeded");
                Ok(value)
            }
            Err(FhevmError::AccessDenied(handle)) => {
                tracing::info!(contract = %contract, handle = %handle, "Public decryption denied by policy");
                Err(ClientError::AccessDenied { handle })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Decrypt `handle` for the wallet behind `signer`.
    ///
    /// Generates a fresh keypair, has the wallet sign the authorization
    /// document binding it to `contract` for the default validity window,
    /// then asks the backend for the cleartext. Any failure is reported as
    /// [`ClientError::UserDecryptFailed`] tagged with the failing step.
    pub async fn user_decrypt<T: WalletTransport + ?Sized>(
        &self,
        handle: CiphertextHandle,
        contract: Address,
        signer: &T,
    ) -> Result<U256, ClientError> {
        let request_id = Uuid::new_v4();
        let backend = self.instance.backend();
        tracing::info!(
            request_id = %request_id,
            contract = %contract,
            handle = %handle,
            "Starting user decryption"
        );

        let keypair = backend.generate_keypair();
        let start_timestamp = keypair.issued_at;
        let duration_days = keypair.validity_days;
        let contracts = vec![contract];
        let message = backend.create_eip712(
            &keypair.public_key,
            &contracts,
            start_timestamp,
            duration_days,
        );
        let typed_data = message
            .typed_data()
            .map_err(|e| ClientError::user_decrypt(UserDecryptStep::Authorization, e))?;

        let signature = signer
            .sign_typed_data(&typed_data)
            .await
            .map_err(|e| ClientError::user_decrypt(UserDecryptStep::Signature, e))?;

        let user_address = signer
            .request_accounts()
            .await
            .map_err(|e| ClientError::user_decrypt(UserDecryptStep::Account, e))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ClientError::user_decrypt(
                    UserDecryptStep::Account,
                    TransportError::Decode {
                        method: "eth_requestAccounts".to_string(),
                        reason: "wallet returned no accounts".to_string(),
                    },
                )
            })?;

        if !message.verify(&signature, user_address) {
            return Err(ClientError::user_decrypt(
                UserDecryptStep::Signature,
                FhevmError::SignatureRejected(format!(
                    "signature does not recover to {user_address}"
                )),
            ));
        }

        let request = UserDecryptRequest {
            pairs: vec![HandleContractPair {
                handle,
                contract_address: contract,
            }],
            keypair,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
            contract_addresses: contracts,
            user_address,
            start_timestamp,
            duration_days,
        };

        let results = backend.user_decrypt(&request).await.map_err(|e| {
            tracing::warn!(request_id = %request_id, error = %e, "User decryption rejected");
            ClientError::user_decrypt(UserDecryptStep::Relayer, e)
        })?;

        let value = results.get(&handle).copied().ok_or_else(|| {
            ClientError::user_decrypt(
                UserDecryptStep::MissingResult,
                FhevmError::UnknownHandle(handle),
            )
        })?;

        tracing::info!(request_id = %request_id, "User decryption completed");
        Ok(value)
    }
}
