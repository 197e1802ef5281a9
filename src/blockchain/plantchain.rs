// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PlantChain ledger contract interactions.

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    providers::DynProvider,
    sol,
};
use async_trait::async_trait;

use super::types::{
    GrowthLogEntry, NewPlant, PlantId, PlantRecord, PointReason, PointsLedgerEntry, TxReceipt,
};

// Encrypted operands travel as `bytes32` handles (`externalEuint32`/`euint32`).
sol! {
    #[sol(rpc)]
    interface IPlantChain {
        struct Plant {
            uint256 id;
            address owner;
            string name;
            string species;
            string description;
            string imageCID;
            uint256 createdAt;
        }

        struct GrowthLog {
            uint256 logId;
            string description;
            string imageCID;
            uint256 timestamp;
        }

        struct PointLog {
            address from;
            uint32 amount;
            uint8 reason;
            uint256 timestamp;
        }

        function createPlant(string name, string species, string description, string imageCID) external returns (uint256);
        function addGrowthLog(uint256 plantId, string description, string imageCID) external;
        function mintPlantNFT(uint256 plantId) external;
        function getPlant(uint256 plantId) external view returns (Plant memory);
        function getGrowthLogs(uint256 plantId) external view returns (GrowthLog[] memory);
        function getMyPlants(address owner) external view returns (uint256[] memory);
        function plantMinted(uint256 plantId) external view returns (bool);
        function getEcoPoints(address user) external view returns (bytes32);
        function addEcoPoints(bytes32 inputHandle, bytes inputProof) external;
        function tipEcoPointOne(uint256 plantId, bytes32 inputHandle, bytes inputProof) external;
        function getPlantPointLogs(uint256 plantId) external view returns (PointLog[] memory);
        function payToViewPointLogs(uint256 plantId) external payable;
    }
}

/// Errors from ledger contract calls.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The contract rejected the call (revert during call or gas estimation).
    #[error("Execution reverted: {0}")]
    Reverted(String),

    /// The transaction could not be submitted or its receipt never arrived.
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// The ledger contract surface used by the client.
///
/// Every method addresses the deployment explicitly so one binding serves
/// any chain the wallet is connected to. Write methods return once the
/// transaction is included.
#[async_trait]
pub trait LedgerContract: Send + Sync {
    async fn create_plant(&self, contract: Address, plant: &NewPlant) -> Result<TxReceipt, LedgerError>;

    async fn add_growth_log(
        &self,
        contract: Address,
        plant_id: PlantId,
        text: &str,
        image_id: &str,
    ) -> Result<TxReceipt, LedgerError>;

    async fn mint_plant_nft(&self, contract: Address, plant_id: PlantId) -> Result<TxReceipt, LedgerError>;

    async fn get_plant(&self, contract: Address, plant_id: PlantId) -> Result<PlantRecord, LedgerError>;

    async fn get_growth_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
    ) -> Result<Vec<GrowthLogEntry>, LedgerError>;

    async fn get_my_plants(&self, contract: Address, owner: Address) -> Result<Vec<PlantId>, LedgerError>;

    async fn plant_minted(&self, contract: Address, plant_id: PlantId) -> Result<bool, LedgerError>;

    async fn get_eco_points(&self, contract: Address, owner: Address) -> Result<B256, LedgerError>;

    async fn add_eco_points(
        &self,
        contract: Address,
        handle: B256,
        proof: &Bytes,
    ) -> Result<TxReceipt, LedgerError>;

    async fn tip_eco_point_one(
        &self,
        contract: Address,
        plant_id: PlantId,
        handle: B256,
        proof: &Bytes,
    ) -> Result<TxReceipt, LedgerError>;

    async fn get_plant_point_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
    ) -> Result<Vec<PointsLedgerEntry>, LedgerError>;

    async fn pay_to_view_point_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
        payment: U256,
    ) -> Result<TxReceipt, LedgerError>;
}

/// `LedgerContract` over an alloy provider with a wallet attached.
pub struct AlloyLedger {
    provider: DynProvider,
    sender: Address,
}

impl AlloyLedger {
    /// `sender` must be the account the provider's wallet signs for; view
    /// calls are issued from it so sender-gated reads behave like the wallet.
    pub fn new(provider: DynProvider, sender: Address) -> Self {
        Self { provider, sender }
    }

    fn at(&self, contract: Address) -> IPlantChain::IPlantChainInstance<DynProvider> {
        IPlantChain::new(contract, self.provider.clone())
    }
}

fn call_error(e: alloy::contract::Error) -> LedgerError {
    if e.as_revert_data().is_some() {
        LedgerError::Reverted(e.to_string())
    } else {
        LedgerError::Rpc(e.to_string())
    }
}

fn to_u64(value: U256) -> u64 {
    value.try_into().unwrap_or(u64::MAX)
}

/// Send a prepared contract call and wait for inclusion.
macro_rules! send_and_confirm {
    ($call:expr) => {{
        let pending = $call.send().await.map_err(|e| {
            if e.as_revert_data().is_some() {
                LedgerError::Reverted(e.to_string())
            } else {
                LedgerError::SubmissionFailed(e.to_string())
            }
        })?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::SubmissionFailed(format!("Failed to get receipt: {}", e)))?;
        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or(0),
            success: receipt.status(),
        })
    }};
}

#[async_trait]
impl LedgerContract for AlloyLedger {
    async fn create_plant(&self, contract: Address, plant: &NewPlant) -> Result<TxReceipt, LedgerError> {
        let ledger = self.at(contract);
        send_and_confirm!(ledger.createPlant(
            plant.name.clone(),
            plant.species.clone(),
            plant.description.clone(),
            plant.image_id.clone(),
        ))
    }

    async fn add_growth_log(
        &self,
        contract: Address,
        plant_id: PlantId,
        text: &str,
        image_id: &str,
    ) -> Result<TxReceipt, LedgerError> {
        let ledger = self.at(contract);
        send_and_confirm!(ledger.addGrowthLog(plant_id, text.to_string(), image_id.to_string()))
    }

    async fn mint_plant_nft(&self, contract: Address, plant_id: PlantId) -> Result<TxReceipt, LedgerError> {
        let ledger = self.at(contract);
        send_and_confirm!(ledger.mintPlantNFT(plant_id))
    }

    async fn get_plant(&self, contract: Address, plant_id: PlantId) -> Result<PlantRecord, LedgerError> {
        let plant = self
            .at(contract)
            .getPlant(plant_id)
            .from(self.sender)
            .call()
            .await
            .map_err(call_error)?;

        Ok(PlantRecord {
            id: plant.id,
            owner: plant.owner,
            name: plant.name,
            species: plant.species,
            description: plant.description,
            image_id: plant.imageCID,
            created_at: to_u64(plant.createdAt),
        })
    }

    async fn get_growth_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
    ) -> Result<Vec<GrowthLogEntry>, LedgerError> {
        let logs = self
            .at(contract)
            .getGrowthLogs(plant_id)
            .from(self.sender)
            .call()
            .await
            .map_err(call_error)?;

        Ok(logs
            .into_iter()
            .map(|log| GrowthLogEntry {
                log_id: log.logId,
                description: log.description,
                image_id: log.imageCID,
                timestamp: to_u64(log.timestamp),
            })
            .collect())
    }

    async fn get_my_plants(&self, contract: Address, owner: Address) -> Result<Vec<PlantId>, LedgerError> {
        self.at(contract)
            .getMyPlants(owner)
            .from(self.sender)
            .call()
            .await
            .map_err(call_error)
    }

    async fn plant_minted(&self, contract: Address, plant_id: PlantId) -> Result<bool, LedgerError> {
        self.at(contract)
            .plantMinted(plant_id)
            .from(self.sender)
            .call()
            .await
            .map_err(call_error)
    }

    async fn get_eco_points(&self, contract: Address, owner: Address) -> Result<B256, LedgerError> {
        self.at(contract)
            .getEcoPoints(owner)
            .from(self.sender)
            .call()
            .await
            .map_err(call_error)
    }

    async fn add_eco_points(
        &self,
        contract: Address,
        handle: B256,
        proof: &Bytes,
    ) -> Result<TxReceipt, LedgerError> {
        let ledger = self.at(contract);
        send_and_confirm!(ledger.addEcoPoints(handle, proof.clone()))
    }

    async fn tip_eco_point_one(
        &self,
        contract: Address,
        plant_id: PlantId,
        handle: B256,
        proof: &Bytes,
    ) -> Result<TxReceipt, LedgerError> {
        let ledger = self.at(contract);
        send_and_confirm!(ledger.tipEcoPointOne(plant_id, handle, proof.clone()))
    }

    async fn get_plant_point_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
    ) -> Result<Vec<PointsLedgerEntry>, LedgerError> {
        let logs = self
            .at(contract)
            .getPlantPointLogs(plant_id)
            .from(self.sender)
            .call()
            .await
            .map_err(call_error)?;

        logs.into_iter()
            .map(|log| {
                let reason = PointReason::from_code(log.reason).ok_or_else(|| {
                    LedgerError::Rpc(format!("Unknown point reason code {}", log.reason))
                })?;
                Ok(PointsLedgerEntry {
                    from_address: log.from,
                    amount: log.amount,
                    reason,
                    timestamp: to_u64(log.timestamp),
                })
            })
            .collect()
    }

    async fn pay_to_view_point_logs(
        &self,
        contract: Address,
        plant_id: PlantId,
        payment: U256,
    ) -> Result<TxReceipt, LedgerError> {
        let ledger = self.at(contract);
        send_and_confirm!(ledger.payToViewPointLogs(plant_id).value(payment))
    }
}
