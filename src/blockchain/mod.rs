// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain-side plumbing.
//!
//! This module provides:
//! - The wallet transport the client signs and queries through
//! - The PlantChain ledger contract binding
//! - Network, deployment and ledger record types
//! - Wallet key loading

pub mod plantchain;
pub mod signing;
pub mod transport;
pub mod types;

pub use plantchain::{AlloyLedger, LedgerContract, LedgerError};
pub use transport::{InMemoryTransport, LocalWalletTransport, TransportError, WalletTransport};
pub use types::*;
