// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crate-level error type.
//!
//! Every failure a caller can act on is its own variant. Access denial on
//! public decryption, user-decryption failures, runtime load failures and
//! chain/deployment mismatches are never folded into a generic message.

use std::fmt;

use alloy::primitives::{Address, B256};

use crate::blockchain::{LedgerError, TransportError};
use crate::fhevm::{FhevmError, LoadError};

/// Stage of the user-decryption protocol that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDecryptStep {
    /// Building the EIP-712 authorization document
    Authorization,
    /// Wallet typed-data signature
    Signature,
    /// Resolving the user's wallet address
    Account,
    /// Relayer round-trip
    Relayer,
    /// Relayer answered without an entry for the requested handle
    MissingResult,
}

impl fmt::Display for UserDecryptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            UserDecryptStep::Authorization => "authorization",
            UserDecryptStep::Signature => "signature",
            UserDecryptStep::Account => "account",
            UserDecryptStep::Relayer => "relayer",
            UserDecryptStep::MissingResult => "missing-result",
        };
        f.write_str(step)
    }
}

/// Errors surfaced by the confidential-value client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("FHE runtime unavailable: {0}")]
    Load(#[from] LoadError),

    #[error("public decryption not allowed for handle {handle}")]
    AccessDenied { handle: B256 },

    #[error("user decryption failed at {step}: {source}")]
    UserDecryptFailed {
        step: UserDecryptStep,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: B256 },

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("contract call rejected: {0}")]
    CallRejected(String),

    #[error("no ledger deployment for chain {chain_id}")]
    NetworkMismatch { chain_id: u64 },

    #[error("wallet transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("cryptosystem error: {0}")]
    Fhevm(#[from] FhevmError),

    #[error("encrypted input for {contract} was already produced by this builder")]
    InputAlreadyEncrypted { contract: Address },

    #[error("invalid encrypted input: {0}")]
    InvalidInput(String),

    #[error("ledger RPC error: {0}")]
    Rpc(String),
}

impl ClientError {
    /// True when public decryption was refused by the ledger's access policy.
    ///
    /// Callers use this to offer user decryption as an explicit action.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, ClientError::AccessDenied { .. })
    }

    pub(crate) fn user_decrypt(
        step: UserDecryptStep,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ClientError::UserDecryptFailed {
            step,
            source: source.into(),
        }
    }
}

impl From<LedgerError> for ClientError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Reverted(reason) => ClientError::CallRejected(reason),
            LedgerError::SubmissionFailed(reason) => ClientError::TransactionFailed(reason),
            LedgerError::Rpc(reason) => ClientError::Rpc(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_is_distinguishable() {
        let denied = ClientError::AccessDenied { handle: B256::ZERO };
        assert!(denied.is_access_denied());

        let other = ClientError::NetworkMismatch { chain_id: 5 };
        assert!(!other.is_access_denied());
    }

    #[test]
    fn user_decrypt_failure_keeps_cause() {
        let err = ClientError::user_decrypt(
            UserDecryptStep::Signature,
            TransportError::Rejected("user denied".to_string()),
        );
        let message = err.to_string();
        assert!(message.contains("signature"));
        assert!(message.contains("user denied"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn ledger_errors_map_to_distinct_kinds() {
        assert!(matches!(
            ClientError::from(LedgerError::Reverted("paywall".into())),
            ClientError::CallRejected(_)
        ));
        assert!(matches!(
            ClientError::from(LedgerError::SubmissionFailed("nonce".into())),
            ClientError::TransactionFailed(_)
        ));
    }
}
