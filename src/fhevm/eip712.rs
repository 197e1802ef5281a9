// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decryption keypairs and the EIP-712 user-decryption authorization.
//!
//! A user decryption is authorized by a typed structured-data signature
//! over a `UserDecryptRequestVerification` document binding an ephemeral
//! public key to a list of contracts and a validity window. The relayer
//! re-derives the same document, so it is signed exactly as produced here.

use std::fmt;

use alloy::{
    dyn_abi::TypedData,
    primitives::{Address, Bytes, Signature, B256, U256},
    signers::local::PrivateKeySigner,
};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::FhevmError;

/// Primary type of the authorization document.
pub const USER_DECRYPT_PRIMARY_TYPE: &str = "UserDecryptRequestVerification";

/// Validity window granted to a decryption keypair.
pub const DEFAULT_VALIDITY_DAYS: u64 = 365;

const SECONDS_PER_DAY: u64 = 86_400;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Ephemeral keypair used for exactly one user decryption.
#[derive(Clone)]
pub struct DecryptionKeypair {
    pub public_key: Bytes,
    private_key: Bytes,
    pub issued_at: u64,
    pub validity_days: u64,
}

impl DecryptionKeypair {
    /// Generate a fresh secp256k1 keypair issued now.
    pub fn generate() -> Self {
        let signer = PrivateKeySigner::random();
        let secret = signer.credential();
        let public_key = secret.verifying_key().to_encoded_point(true);

        Self {
            public_key: Bytes::copy_from_slice(public_key.as_bytes()),
            private_key: Bytes::copy_from_slice(&secret.to_bytes()[..]),
            issued_at: unix_now(),
            validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }

    pub fn private_key(&self) -> &Bytes {
        &self.private_key
    }

    /// True when the private half actually derives the public half.
    pub fn is_consistent(&self) -> bool {
        SigningKey::from_slice(&self.private_key)
            .map(|key| key.verifying_key().to_encoded_point(true).as_bytes() == self.public_key.as_ref())
            .unwrap_or(false)
    }
}

impl fmt::Debug for DecryptionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionKeypair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("validity_days", &self.validity_days)
            .finish()
    }
}

/// EIP-712 domain of the decryption verifying contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptionDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl DecryptionDomain {
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: "Decryption".to_string(),
            version: "1".to_string(),
            chain_id,
            verifying_contract,
        }
    }
}

/// The `UserDecryptRequestVerification` document a wallet signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationMessage {
    pub domain: DecryptionDomain,
    pub public_key: Bytes,
    pub contract_addresses: Vec<Address>,
    pub start_timestamp: u64,
    pub duration_days: u64,
    pub extra_data: Bytes,
}

impl AuthorizationMessage {
    pub fn new(
        domain: DecryptionDomain,
        public_key: &Bytes,
        contracts: &[Address],
        start_timestamp: u64,
        duration_days: u64,
    ) -> Self {
        Self {
            domain,
            public_key: public_key.clone(),
            contract_addresses: contracts.to_vec(),
            start_timestamp,
            duration_days,
            extra_data: Bytes::from_static(&[0x00]),
        }
    }

    /// The typed-data document in `eth_signTypedData_v4` shape.
    pub fn typed_data(&self) -> Result<TypedData, FhevmError> {
        let document = json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" }
                ],
                USER_DECRYPT_PRIMARY_TYPE: [
                    { "name": "publicKey", "type": "bytes" },
                    { "name": "contractAddresses", "type": "address[]" },
                    { "name": "startTimestamp", "type": "uint256" },
                    { "name": "durationDays", "type": "uint256" },
                    { "name": "extraData", "type": "bytes" }
                ]
            },
            "primaryType": USER_DECRYPT_PRIMARY_TYPE,
            "domain": {
                "name": self.domain.name,
                "version": self.domain.version,
                "chainId": U256::from(self.domain.chain_id),
                "verifyingContract": self.domain.verifying_contract
            },
            "message": {
                "publicKey": self.public_key,
                "contractAddresses": self.contract_addresses,
                "startTimestamp": self.start_timestamp.to_string(),
                "durationDays": self.duration_days.to_string(),
                "extraData": self.extra_data
            }
        });

        serde_json::from_value(document).map_err(|e| FhevmError::Codec(e.to_string()))
    }

    /// EIP-712 digest the wallet signs.
    pub fn signing_hash(&self) -> Result<B256, FhevmError> {
        self.typed_data()?
            .eip712_signing_hash()
            .map_err(|e| FhevmError::Codec(e.to_string()))
    }

    /// Recover the address that produced `signature` over this document.
    pub fn recover_signer(&self, signature: &Signature) -> Result<Address, FhevmError> {
        let hash = self.signing_hash()?;
        signature
            .recover_address_from_prehash(&hash)
            .map_err(|e| FhevmError::SignatureRejected(e.to_string()))
    }

    /// True when `signature` is `expected`'s signature over this exact document.
    pub fn verify(&self, signature: &Signature, expected: Address) -> bool {
        matches!(self.recover_signer(signature), Ok(signer) if signer == expected)
    }

    /// True when `now` falls inside the signed validity window.
    pub fn is_valid_at(&self, now: u64) -> bool {
        let end = self
            .start_timestamp
            .saturating_add(self.duration_days.saturating_mul(SECONDS_PER_DAY));
        now >= self.start_timestamp && now < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::SignerSync;

    fn sample_message(keypair: &DecryptionKeypair) -> AuthorizationMessage {
        AuthorizationMessage::new(
            DecryptionDomain::new(55815, Address::repeat_byte(0xd1)),
            &keypair.public_key,
            &[Address::repeat_byte(0x11)],
            1_700_000_000,
            DEFAULT_VALIDITY_DAYS,
        )
    }

    fn sign(signer: &PrivateKeySigner, message: &AuthorizationMessage) -> Signature {
        signer
            .sign_dynamic_typed_data_sync(&message.typed_data().unwrap())
            .unwrap()
    }

    #[test]
    fn unmodified_message_verifies() {
        let signer = PrivateKeySigner::random();
        let keypair = DecryptionKeypair::generate();
        let message = sample_message(&keypair);
        let signature = sign(&signer, &message);

        assert!(message.verify(&signature, signer.address()));
    }

    #[test]
    fn mutating_contract_address_invalidates() {
        let signer = PrivateKeySigner::random();
        let keypair = DecryptionKeypair::generate();
        let message = sample_message(&keypair);
        let signature = sign(&signer, &message);

        let mut tampered = message.clone();
        tampered.contract_addresses = vec![Address::repeat_byte(0x22)];
        assert!(!tampered.verify(&signature, signer.address()));
    }

    #[test]
    fn mutating_validity_window_invalidates() {
        let signer = PrivateKeySigner::random();
        let keypair = DecryptionKeypair::generate();
        let message = sample_message(&keypair);
        let signature = sign(&signer, &message);

        let mut longer = message.clone();
        longer.duration_days = DEFAULT_VALIDITY_DAYS + 1;
        assert!(!longer.verify(&signature, signer.address()));

        let mut earlier = message.clone();
        earlier.start_timestamp -= 1;
        assert!(!earlier.verify(&signature, signer.address()));
    }

    #[test]
    fn mutating_public_key_invalidates() {
        let signer = PrivateKeySigner::random();
        let keypair = DecryptionKeypair::generate();
        let message = sample_message(&keypair);
        let signature = sign(&signer, &message);

        let mut swapped = message.clone();
        swapped.public_key = DecryptionKeypair::generate().public_key;
        assert!(!swapped.verify(&signature, signer.address()));
    }

    #[test]
    fn wrong_signer_does_not_verify() {
        let keypair = DecryptionKeypair::generate();
        let message = sample_message(&keypair);
        let signature = sign(&PrivateKeySigner::random(), &message);

        assert!(!message.verify(&signature, PrivateKeySigner::random().address()));
    }

    #[test]
    fn typed_data_uses_decryption_primary_type() {
        let message = sample_message(&DecryptionKeypair::generate());
        let typed = message.typed_data().unwrap();
        assert_eq!(typed.primary_type, USER_DECRYPT_PRIMARY_TYPE);
        assert_eq!(typed.message["durationDays"], "365");
        assert_eq!(typed.message["extraData"], "0x00");
    }

    #[test]
    fn keypairs_are_fresh_and_consistent() {
        let first = DecryptionKeypair::generate();
        let second = DecryptionKeypair::generate();

        assert_ne!(first.public_key, second.public_key);
        assert!(first.is_consistent());
        assert_eq!(first.validity_days, 365);
        assert_eq!(first.public_key.len(), 33);
    }

    #[test]
    fn debug_output_hides_private_key() {
        let keypair = DecryptionKeypair::generate();
        let rendered = format!("{keypair:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&alloy::hex::encode(keypair.private_key())));
    }

    #[test]
    fn validity_window_bounds() {
        let message = sample_message(&DecryptionKeypair::generate());
        let start = message.start_timestamp;
        assert!(!message.is_valid_at(start - 1));
        assert!(message.is_valid_at(start));
        assert!(message.is_valid_at(start + 364 * SECONDS_PER_DAY));
        assert!(!message.is_valid_at(start + 365 * SECONDS_PER_DAY));
    }
}
