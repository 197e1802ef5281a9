// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory ledger contract for local development and tests.
//!
//! Behaves like the deployed contract from the client's point of view:
//! owner checks, single-mint, the point-log paywall, encrypted point
//! credits verified through the shared [`MockCoprocessor`]. Every call is
//! counted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::blockchain::{
    GrowthLogEntry, LedgerContract, LedgerError, NewPlant, PlantId, PlantRecord, PointReason,
    PointsLedgerEntry, TxReceipt, POINT_LOG_VIEW_FEE_WEI,
};
use crate::fhevm::eip712::unix_now;
use crate::fhevm::mock::MockCoprocessor;
use crate::fhevm::CiphertextHandle;

struct PlantState {
    record: PlantRecord,
    growth_logs: Vec<GrowthLogEntry>,
    point_logs: Vec<PointsLedgerEntry>,
    minted: bool,
    paid_viewers: HashSet<Address>,
}

#[derive(Default)]
struct ChainState {
    plants: Vec<PlantState>,
    points: HashMap<Address, CiphertextHandle>,
    block_number: u64,
}

impl ChainState {
    fn plant_mut(&mut self, plant_id: PlantId) -> Result<&mut PlantState, LedgerError> {
        let index = usize::try_from(plant_id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .ok_or_else(|| LedgerError::Reverted("plant does not exist".to_string()))?;
        self.plants
            .get_mut(index)
            .ok_or_else(|| LedgerError::Reverted("plant does not exist".to_string()))
    }

    fn receipt(&mut self) -> TxReceipt {
        self.block_number += 1;
        TxReceipt {
            tx_hash: keccak256(self.block_number.to_be_bytes()),
            block_number: self.block_number,
            success: true,
        }
    }
}

/// A deployed ledger on an in-process chain.
pub struct MockPlantChain {
    chain_id: u64,
    address: Address,
    coprocessor: Arc<MockCoprocessor>,
    public_balances: bool,
    balance_reads_fail: AtomicBool,
    state: Mutex<ChainState>,
    calls: AtomicUsize,
}

impl MockPlantChain {
    pub fn new(address: Address, coprocessor: Arc<MockCoprocessor>) -> Self {
        Self {
            chain_id: coprocessor.chain_id(),
            address,
            coprocessor,
            public_balances: false,
            balance_reads_fail: AtomicBool::new(false),
            state: Mutex::new(ChainState::default()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Mark every balance the ledger writes as publicly decryptable.
    pub fn with_public_balances(mut self) -> Self {
        self.public_balances = true;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Contract binding that sends as `sender`.
    pub fn connect(self: &Arc<Self>, sender: Address) -> MockLedger {
        MockLedger {
            chain: self.clone(),
            sender,
        }
    }

    /// Make `getEcoPoints` fail with an RPC error until switched back.
    pub fn set_balance_reads_failing(&self, failing: bool) {
        self.balance_reads_fail.store(failing, Ordering::SeqCst);
    }

    /// Number of contract calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, contract: Address) -> Result<(), LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if contract != self.address {
            return Err(LedgerError::Rpc(format!("no contract deployed at {contract}")));
        }
        Ok(())
    }

    fn credit(&self, state: &mut ChainState, account: Address, amount: CiphertextHandle) -> Result<(), LedgerError> {
        let current = match state.points.get(&account) {
            Some(handle) => *handle,
            None => self.coprocessor.trivial_encrypt(0),
        };
        let updated = self
            .coprocessor
            .add(current, amount)
            .map_err(|e| LedgerError::Reverted(e.to_string()))?;
        self.coprocessor.allow(updated, account);
        self.coprocessor.allow(updated, self.address);
        if self.public_balances {
            self.coprocessor.make_publicly_decryptable(updated);
        }
        state.points.insert(account, updated);
        Ok(())
    }

    fn verified_input(&self, sender: Address, handle: B256, proof: &Bytes) -> Result<CiphertextHandle, LedgerError> {
        self.coprocessor
            .verify_input(self.chain_id, self.address, sender, handle, proof)
            .map_err(|e| LedgerError::Reverted(e.to_string()))
    }
}

/// [`LedgerContract`] view of a [`MockPlantChain`] for one sender.
pub struct MockLedger {
    chain: Arc<MockPlantChain>,
    sender: Address,
}

fn only_owner(plant: &PlantState, sender: Address) -> Result<(), LedgerError> {
    if plant.record.owner != sender {
        return Err(LedgerError::Reverted("caller is not the plant owner".to_string()));
    }
    Ok(())
}

#[async_trait]
impl LedgerContract for MockLedger {
    async fn create_plant(&self, contract: Address, plant: &NewPlant) -> Result<TxReceipt, LedgerError> {
        self.chain.enter(contract)?;
        let mut state = self.chain.state();
        let now = unix_now();
        let id = U256::from(state.plants.len() + 1);

        let one = self.chain.coprocessor.trivial_encrypt(1);
        self.chain.credit(&mut state, self.sender, one)?;
        state.plants.push(PlantState {
            record: PlantRecord {
                id,
                owner: self.sender,
                name: plant.name.clone(),
                species: plant.species.clone(),
                description: plant.description.clone(),
                image_id: plant.image_id.clone(),
                created_at: now,
            },
            growth_logs: Vec::new(),
            point_logs: vec![PointsLedgerEntry {
                from_address: self.sender,
                amount: 1,
                reason: PointReason::Create,
                timestamp: now,
            }],
            minted: false,
            paid_viewers: HashSet::new(),
        });
        Ok(state.receipt())
    }

    async fn add_growth_log(
        &self,
        contract: Address,
        plant_id: PlantId,
        text: &str,
        image_id: &str,
    ) -> Result<TxReceipt, LedgerError> {
        self.chain.enter(contract)?;
        let mut state = self.chain.state();
        let now = unix_now();
        only_owner(state.plant_mut(plant_id)?, self.sender)?;

        let one = self.chain.coprocessor.trivial_encrypt(1);
        self.chain.credit(&mut state, self.sender, one)?;

        let plant = state.plant_mut(plant_id)?;
        let log_id = U256::from(plant.growth_logs.len() + 1);
        plant.growth_logs.push(GrowthLogEntry {
            log_id,
            description: text.to_string(),
            image_id: image_id.to_string(),
            timestamp: now,
        });
        plant.point_logs.push(PointsLedgerEntry {
            from_address: self.sender,
            amount: 1,
            reason: PointReason::Log,
            timestamp: now,
        });
        Ok(state.receipt())
    }

    async fn mint_plant_nft(&self, contract: Address, plant_id: PlantId) -> Result<TxReceipt, LedgerError> {
        self.chain.enter(contract)?;
        let mut state = self.chain.state();
        let plant = state.plant_mut(plant_id)?;
        only_owner(plant, self.sender)?;
        if plant.minted {
            return Err(LedgerError::Reverted("plant already minted".to_string()));
        }
        plant.minted = true;
        Ok(state.receipt())
    }

    async fn get_plant(&self, contract: Address, plant_id: PlantId) -> Result<PlantRecord, LedgerError> {
        self.chain.enter(contract)?;
        let mut state = self.chain.state();
        Ok(state.plant_mut(plant_id)?.record.clone())
    }

    async fn get_growth_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
    ) -> Result<Vec<GrowthLogEntry>, LedgerError> {
        self.chain.enter(contract)?;
        let mut state = self.chain.state();
        Ok(state.plant_mut(plant_id)?.growth_logs.clone())
    }

    async fn get_my_plants(&self, contract: Address, owner: Address) -> Result<Vec<PlantId>, LedgerError> {
        self.chain.enter(contract)?;
        let state = self.chain.state();
        Ok(state
            .plants
            .iter()
            .filter(|plant| plant.record.owner == owner)
            .map(|plant| plant.record.id)
            .collect())
    }

    async fn plant_minted(&self, contract: Address, plant_id: PlantId) -> Result<bool, LedgerError> {
        self.chain.enter(contract)?;
        let mut state = self.chain.state();
        Ok(state.plant_mut(plant_id)?.minted)
    }

    async fn get_eco_points(&self, contract: Address, owner: Address) -> Result<B256, LedgerError> {
        self.chain.enter(contract)?;
        if self.chain.balance_reads_fail.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("getEcoPoints: upstream unavailable".to_string()));
        }
        let state = self.chain.state();
        Ok(state.points.get(&owner).copied().unwrap_or(B256::ZERO))
    }

    async fn add_eco_points(
        &self,
        contract: Address,
        handle: B256,
        proof: &Bytes,
    ) -> Result<TxReceipt, LedgerError> {
        self.chain.enter(contract)?;
        let amount = self.chain.verified_input(self.sender, handle, proof)?;
        let mut state = self.chain.state();
        self.chain.credit(&mut state, self.sender, amount)?;
        Ok(state.receipt())
    }

    async fn tip_eco_point_one(
        &self,
        contract: Address,
        plant_id: PlantId,
        handle: B256,
        proof: &Bytes,
    ) -> Result<TxReceipt, LedgerError> {
        self.chain.enter(contract)?;
        let owner = {
            let mut state = self.chain.state();
            state.plant_mut(plant_id)?.record.owner
        };
        let amount = self.chain.verified_input(self.sender, handle, proof)?;

        let mut state = self.chain.state();
        self.chain.credit(&mut state, owner, amount)?;
        state.plant_mut(plant_id)?.point_logs.push(PointsLedgerEntry {
            from_address: self.sender,
            amount: 1,
            reason: PointReason::Tip,
            timestamp: unix_now(),
        });
        Ok(state.receipt())
    }

    async fn get_plant_point_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
    ) -> Result<Vec<PointsLedgerEntry>, LedgerError> {
        self.chain.enter(contract)?;
        let mut state = self.chain.state();
        let plant = state.plant_mut(plant_id)?;
        if plant.record.owner != self.sender && !plant.paid_viewers.contains(&self.sender) {
            return Err(LedgerError::Reverted("payment required to view point logs".to_string()));
        }
        Ok(plant.point_logs.clone())
    }

    async fn pay_to_view_point_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
        payment: U256,
    ) -> Result<TxReceipt, LedgerError> {
        self.chain.enter(contract)?;
        if payment < U256::from(POINT_LOG_VIEW_FEE_WEI) {
            return Err(LedgerError::Reverted("insufficient payment".to_string()));
        }
        let mut state = self.chain.state();
        state.plant_mut(plant_id)?.paid_viewers.insert(self.sender);
        Ok(state.receipt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEDGER: Address = Address::repeat_byte(0x11);
    const OWNER: Address = Address::repeat_byte(0x22);
    const VISITOR: Address = Address::repeat_byte(0x33);

    fn chain() -> Arc<MockPlantChain> {
        Arc::new(MockPlantChain::new(LEDGER, Arc::new(MockCoprocessor::new(31337))))
    }

    fn sample_plant() -> NewPlant {
        NewPlant {
            name: "Monstera".to_string(),
            species: "Monstera deliciosa".to_string(),
            description: "Window sill".to_string(),
            image_id: "bafy-monstera".to_string(),
        }
    }

    #[tokio::test]
    async fn create_plant_credits_one_point() {
        let chain = chain();
        let owner = chain.connect(OWNER);
        owner.create_plant(LEDGER, &sample_plant()).await.unwrap();

        let handle = owner.get_eco_points(LEDGER, OWNER).await.unwrap();
        assert_ne!(handle, B256::ZERO);
        assert_eq!(chain.coprocessor.user_decrypt(handle, OWNER, LEDGER).unwrap(), U256::from(1));
        assert_eq!(owner.get_my_plants(LEDGER, OWNER).await.unwrap(), vec![U256::from(1)]);
    }

    #[tokio::test]
    async fn only_owner_adds_growth_logs() {
        let chain = chain();
        chain.connect(OWNER).create_plant(LEDGER, &sample_plant()).await.unwrap();

        let err = chain
            .connect(VISITOR)
            .add_growth_log(LEDGER, U256::from(1), "leaf", "bafy-leaf")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Reverted(_)));
    }

    #[tokio::test]
    async fn growth_log_credits_its_point() {
        let chain = chain();
        let owner = chain.connect(OWNER);
        owner.create_plant(LEDGER, &sample_plant()).await.unwrap();

        owner
            .add_growth_log(LEDGER, U256::from(1), "new leaf", "bafy-leaf")
            .await
            .unwrap();

        let handle = owner.get_eco_points(LEDGER, OWNER).await.unwrap();
        assert_eq!(chain.coprocessor.user_decrypt(handle, OWNER, LEDGER).unwrap(), U256::from(2));
        let logs = owner.get_plant_point_logs(LEDGER, U256::from(1)).await.unwrap();
        assert_eq!(logs.last().unwrap().reason, PointReason::Log);
    }

    #[tokio::test]
    async fn plants_mint_once() {
        let chain = chain();
        let owner = chain.connect(OWNER);
        owner.create_plant(LEDGER, &sample_plant()).await.unwrap();

        owner.mint_plant_nft(LEDGER, U256::from(1)).await.unwrap();
        assert!(owner.plant_minted(LEDGER, U256::from(1)).await.unwrap());
        assert!(owner.mint_plant_nft(LEDGER, U256::from(1)).await.is_err());
    }

    #[tokio::test]
    async fn point_logs_are_paywalled_for_visitors() {
        let chain = chain();
        chain.connect(OWNER).create_plant(LEDGER, &sample_plant()).await.unwrap();
        let visitor = chain.connect(VISITOR);
        let plant_id = U256::from(1);

        assert!(visitor.get_plant_point_logs(LEDGER, plant_id).await.is_err());
        assert!(visitor
            .pay_to_view_point_logs(LEDGER, plant_id, U256::from(POINT_LOG_VIEW_FEE_WEI - 1))
            .await
            .is_err());

        visitor
            .pay_to_view_point_logs(LEDGER, plant_id, U256::from(POINT_LOG_VIEW_FEE_WEI))
            .await
            .unwrap();
        let logs = visitor.get_plant_point_logs(LEDGER, plant_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].reason, PointReason::Create);
    }

    #[tokio::test]
    async fn wrong_address_is_not_a_deployment() {
        let chain = chain();
        let err = chain
            .connect(OWNER)
            .get_eco_points(Address::repeat_byte(0x99), OWNER)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rpc(_)));
        assert_eq!(chain.call_count(), 1);
    }

    #[tokio::test]
    async fn tip_credits_plant_owner_and_logs_it() {
        let chain = chain();
        chain.connect(OWNER).create_plant(LEDGER, &sample_plant()).await.unwrap();
        let visitor = chain.connect(VISITOR);

        let batch = chain.coprocessor.encrypt_u32(31337, LEDGER, VISITOR, &[1]).unwrap();
        visitor
            .tip_eco_point_one(LEDGER, U256::from(1), batch.handles[0], &batch.input_proof)
            .await
            .unwrap();

        let handle = visitor.get_eco_points(LEDGER, OWNER).await.unwrap();
        assert_eq!(chain.coprocessor.user_decrypt(handle, OWNER, LEDGER).unwrap(), U256::from(2));
        let logs = chain.connect(OWNER).get_plant_point_logs(LEDGER, U256::from(1)).await.unwrap();
        assert_eq!(logs.last().unwrap().reason, PointReason::Tip);
        assert_eq!(logs.last().unwrap().from_address, VISITOR);
    }
}
