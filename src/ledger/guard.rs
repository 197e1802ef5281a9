// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Displayed balance with a stale-result guard.
//!
//! Handle refreshes and decryptions take a [`ViewTicket`] when they start.
//! A result is applied only if the view still targets the same
//! `(chain, account)` and no retarget happened in between; otherwise it is
//! dropped.

use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy::primitives::{Address, U256};

use crate::fhevm::CiphertextHandle;

/// What the balance view is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewKey {
    pub chain_id: u64,
    pub account: Address,
}

/// Captured at call time; compared when the result arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewTicket {
    generation: u64,
    pub key: ViewKey,
}

/// Current contents of the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceSnapshot {
    pub key: Option<ViewKey>,
    pub handle: Option<CiphertextHandle>,
    pub cleartext: Option<U256>,
}

#[derive(Default)]
struct ViewState {
    generation: u64,
    snapshot: BalanceSnapshot,
}

#[derive(Default)]
pub struct DisplayedBalance {
    state: Mutex<ViewState>,
}

impl DisplayedBalance {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point the view at `key`, clearing what it showed.
    ///
    /// Every ticket issued before this call becomes stale, even when `key`
    /// equals the previous target.
    pub fn retarget(&self, key: ViewKey) -> ViewTicket {
        let mut state = self.state();
        state.generation += 1;
        state.snapshot = BalanceSnapshot {
            key: Some(key),
            handle: None,
            cleartext: None,
        };
        ViewTicket {
            generation: state.generation,
            key,
        }
    }

    /// Ticket for the current target, if any.
    pub fn ticket(&self) -> Option<ViewTicket> {
        let state = self.state();
        state.snapshot.key.map(|key| ViewTicket {
            generation: state.generation,
            key,
        })
    }

    pub fn is_current(&self, ticket: &ViewTicket) -> bool {
        let state = self.state();
        state.generation == ticket.generation && state.snapshot.key == Some(ticket.key)
    }

    /// Show `handle` if `ticket` is still current. A new handle clears the
    /// cleartext shown for the old one.
    pub fn apply_handle(&self, ticket: &ViewTicket, handle: CiphertextHandle) -> bool {
        let mut state = self.state();
        if state.generation != ticket.generation {
            return false;
        }
        if state.snapshot.handle != Some(handle) {
            state.snapshot.cleartext = None;
        }
        state.snapshot.handle = Some(handle);
        true
    }

    /// Show `cleartext` if `ticket` is still current and `handle` is still
    /// the displayed handle.
    pub fn apply_cleartext(&self, ticket: &ViewTicket, handle: CiphertextHandle, cleartext: U256) -> bool {
        let mut state = self.state();
        if state.generation != ticket.generation || state.snapshot.handle != Some(handle) {
            return false;
        }
        state.snapshot.cleartext = Some(cleartext);
        true
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        self.state().snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(chain_id: u64) -> ViewKey {
        ViewKey {
            chain_id,
            account: Address::repeat_byte(0x22),
        }
    }

    #[test]
    fn results_for_a_retargeted_view_are_dropped() {
        let view = DisplayedBalance::new();
        let stale = view.retarget(key(31337));
        view.retarget(key(11155111));

        assert!(!view.is_current(&stale));
        assert!(!view.apply_handle(&stale, CiphertextHandle::repeat_byte(1)));
        assert_eq!(view.snapshot().handle, None);
        assert_eq!(view.snapshot().key, Some(key(11155111)));
    }

    #[test]
    fn retarget_to_same_key_still_invalidates() {
        let view = DisplayedBalance::new();
        let first = view.retarget(key(31337));
        view.retarget(key(31337));
        assert!(!view.is_current(&first));
    }

    #[test]
    fn cleartext_must_match_displayed_handle() {
        let view = DisplayedBalance::new();
        let ticket = view.retarget(key(31337));
        let old = CiphertextHandle::repeat_byte(1);
        let new = CiphertextHandle::repeat_byte(2);

        assert!(view.apply_handle(&ticket, old));
        assert!(view.apply_handle(&ticket, new));
        assert!(!view.apply_cleartext(&ticket, old, U256::from(1)));
        assert!(view.apply_cleartext(&ticket, new, U256::from(2)));
        assert_eq!(view.snapshot().cleartext, Some(U256::from(2)));
    }

    #[test]
    fn new_handle_clears_previous_cleartext() {
        let view = DisplayedBalance::new();
        let ticket = view.retarget(key(31337));
        let old = CiphertextHandle::repeat_byte(1);

        view.apply_handle(&ticket, old);
        view.apply_cleartext(&ticket, old, U256::from(1));
        view.apply_handle(&ticket, CiphertextHandle::repeat_byte(2));

        assert_eq!(view.snapshot().cleartext, None);
    }

    #[test]
    fn untargeted_view_issues_no_ticket() {
        assert!(DisplayedBalance::new().ticket().is_none());
    }
}
