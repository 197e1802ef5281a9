// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PlantChain client - confidential eco-points over an FHE co-processor
//!
//! Submits encrypted point credits to the PlantChain ledger contract and
//! recovers cleartext balances through public or signed user decryption.
//! Local development chains run against a deterministic mock cryptosystem;
//! everything else goes through the production relayer.
//!
//! ## Modules
//!
//! - `blockchain` - wallet transport, ledger contract binding, key loading
//! - `fhevm` - runtime bootstrap, environment detection, encrypted inputs, decryption
//! - `ledger` - points ledger client and balance view
//! - `config` - environment variables and resolved client configuration
//! - `logging` - tracing subscriber setup

pub mod blockchain;
pub mod config;
pub mod error;
pub mod fhevm;
pub mod ledger;
pub mod logging;

pub use error::{ClientError, UserDecryptStep};
pub use ledger::{DecryptStrategy, PointsLedgerClient};
