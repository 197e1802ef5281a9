// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Points ledger client.
//!
//! Every mutation is a strict submit, confirm, refresh cycle: the encrypted
//! balance is never updated locally, the client re-reads the handle the
//! contract holds once the transaction is included. Operations on a chain
//! without a ledger deployment fail with `NetworkMismatch` before any
//! contract, relayer or runtime call is made.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};

use crate::blockchain::{
    explorer_tx_url, Deployments, GrowthLogEntry, LedgerContract, NetworkContext, NewPlant,
    PlantId, PlantRecord, PointsLedgerEntry, TransportError, TxReceipt, WalletTransport,
    POINT_LOG_VIEW_FEE_WEI,
};
use crate::error::ClientError;
use crate::fhevm::{CiphertextHandle, ConfidentialInstance, DecryptionCoordinator, InstanceFactory};

pub mod guard;
pub mod mock;

pub use guard::{BalanceSnapshot, DisplayedBalance, ViewKey, ViewTicket};
pub use mock::{MockLedger, MockPlantChain};

/// How to reveal the displayed balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptStrategy {
    /// Relayer public decryption; no wallet prompt.
    Public,
    /// Signed user decryption; prompts the wallet.
    User,
}

/// Client for one wallet account against the ledger contract.
pub struct PointsLedgerClient {
    transport: Arc<dyn WalletTransport>,
    ledger: Arc<dyn LedgerContract>,
    factory: Arc<InstanceFactory>,
    deployments: Deployments,
    account: Address,
    chain_id: AtomicU64,
    displayed: DisplayedBalance,
}

impl PointsLedgerClient {
    /// Resolve the wallet account and active chain, and target the balance
    /// view at them.
    ///
    /// Succeeds on unsupported chains; operations then fail with
    /// `NetworkMismatch` until [`switch_network`](Self::switch_network).
    pub async fn connect(
        transport: Arc<dyn WalletTransport>,
        ledger: Arc<dyn LedgerContract>,
        factory: Arc<InstanceFactory>,
        deployments: Deployments,
    ) -> Result<Self, ClientError> {
        let account = transport
            .request_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Decode {
                method: "eth_requestAccounts".to_string(),
                reason: "wallet returned no accounts".to_string(),
            })?;
        let chain_id = transport.chain_id().await?;

        let client = Self {
            transport,
            ledger,
            factory,
            deployments,
            account,
            chain_id: AtomicU64::new(chain_id),
            displayed: DisplayedBalance::new(),
        };
        client.displayed.retarget(ViewKey { chain_id, account });

        match client.network() {
            Ok(network) => tracing::info!(
                chain_id,
                account = %account,
                contract = %network.contract_address,
                "Ledger client connected"
            ),
            Err(_) => tracing::warn!(chain_id, account = %account, "No ledger deployment for active chain"),
        }
        Ok(client)
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id.load(Ordering::SeqCst)
    }

    /// Ledger coordinates for the active chain.
    pub fn network(&self) -> Result<NetworkContext, ClientError> {
        let chain_id = self.chain_id();
        Ok(NetworkContext {
            chain_id,
            rpc_endpoint: self.transport.rpc_url().to_string(),
            contract_address: self.deployments.resolve(chain_id)?,
        })
    }

    pub fn displayed(&self) -> BalanceSnapshot {
        self.displayed.snapshot()
    }

    /// Confidential instance for `network`, checked against the wallet's
    /// live chain.
    async fn instance(&self, network: &NetworkContext) -> Result<Arc<ConfidentialInstance>, ClientError> {
        let instance = self.factory.create_instance(self.transport.as_ref()).await?;
        if instance.chain_id() != network.chain_id {
            return Err(ClientError::NetworkMismatch {
                chain_id: instance.chain_id(),
            });
        }
        Ok(instance)
    }

    fn confirmed(&self, network: &NetworkContext, action: &str, receipt: TxReceipt) -> Result<TxReceipt, ClientError> {
        if !receipt.success {
            tracing::error!(tx_hash = %receipt.tx_hash, action, "Transaction reverted");
            return Err(ClientError::TransactionReverted {
                tx_hash: receipt.tx_hash,
            });
        }
        tracing::info!(
            tx_hash = %receipt.tx_hash,
            block_number = receipt.block_number,
            explorer = explorer_tx_url(network.chain_id, receipt.tx_hash).as_deref().unwrap_or(""),
            action,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    /// Re-read the displayed handle after a confirmed write. The write
    /// stands either way; a failed read leaves the view stale.
    async fn refresh_after(&self, action: &str) {
        if let Err(e) = self.refresh_displayed().await {
            tracing::warn!(action, error = %e, "Balance refresh failed after confirmed transaction");
        }
    }

    /// Credit one encrypted point to the connected account.
    pub async fn add_point(&self) -> Result<TxReceipt, ClientError> {
        let network = self.network()?;
        let instance = self.instance(&network).await?;

        let input = instance
            .create_encrypted_input(network.contract_address, self.account)
            .add_u32(1)
            .encrypt()
            .await?;
        let receipt = self
            .ledger
            .add_eco_points(network.contract_address, input.handle, &input.proof)
            .await?;
        let receipt = self.confirmed(&network, "add_point", receipt)?;

        self.refresh_after("add_point").await;
        Ok(receipt)
    }

    /// Send one encrypted point to the owner of `plant_id`.
    pub async fn tip_point(&self, plant_id: PlantId) -> Result<TxReceipt, ClientError> {
        let network = self.network()?;
        let instance = self.instance(&network).await?;

        let input = instance
            .create_encrypted_input(network.contract_address, self.account)
            .add_u32(1)
            .encrypt()
            .await?;
        let receipt = self
            .ledger
            .tip_eco_point_one(network.contract_address, plant_id, input.handle, &input.proof)
            .await?;
        let receipt = self.confirmed(&network, "tip_point", receipt)?;

        self.refresh_after("tip_point").await;
        Ok(receipt)
    }

    /// Current balance handle of `owner`. No decryption.
    pub async fn refresh_handle(&self, owner: Address) -> Result<CiphertextHandle, ClientError> {
        let network = self.network()?;
        Ok(self
            .ledger
            .get_eco_points(network.contract_address, owner)
            .await?)
    }

    /// Re-read the connected account's handle into the balance view.
    ///
    /// Returns `None` when the view was retargeted while the read was in
    /// flight; the result is then dropped.
    pub async fn refresh_displayed(&self) -> Result<Option<CiphertextHandle>, ClientError> {
        let network = self.network()?;
        let Some(ticket) = self.displayed.ticket() else {
            return Ok(None);
        };
        if ticket.key.chain_id != network.chain_id {
            return Ok(None);
        }

        let handle = self.refresh_handle(ticket.key.account).await?;
        if !self.displayed.apply_handle(&ticket, handle) {
            tracing::debug!(handle = %handle, "Discarding stale balance handle");
            return Ok(None);
        }
        Ok(Some(handle))
    }

    /// Decrypt a publicly readable handle of the ledger.
    pub async fn decrypt_public(&self, handle: CiphertextHandle) -> Result<U256, ClientError> {
        let network = self.network()?;
        let instance = self.instance(&network).await?;
        DecryptionCoordinator::new(instance)
            .public_decrypt(network.contract_address, handle)
            .await
    }

    /// Decrypt `handle` for the connected account. Prompts the wallet.
    pub async fn decrypt_user(&self, handle: CiphertextHandle) -> Result<U256, ClientError> {
        let network = self.network()?;
        let instance = self.instance(&network).await?;
        DecryptionCoordinator::new(instance)
            .user_decrypt(handle, network.contract_address, self.transport.as_ref())
            .await
    }

    /// Decrypt the displayed handle with `strategy` and show the cleartext.
    ///
    /// Refreshes the handle first if none is displayed. Returns `None` when
    /// the view moved on before the cleartext arrived. An `AccessDenied`
    /// from [`DecryptStrategy::Public`] is returned as is; switching to
    /// [`DecryptStrategy::User`] is the caller's decision.
    pub async fn reveal(&self, strategy: DecryptStrategy) -> Result<Option<U256>, ClientError> {
        let network = self.network()?;
        let Some(ticket) = self.displayed.ticket() else {
            return Ok(None);
        };

        let handle = match self.displayed.snapshot().handle {
            Some(handle) => handle,
            None => match self.refresh_displayed().await? {
                Some(handle) => handle,
                None => return Ok(None),
            },
        };

        let instance = self.instance(&network).await?;
        let coordinator = DecryptionCoordinator::new(instance);
        let cleartext = match strategy {
            DecryptStrategy::Public => {
                coordinator
                    .public_decrypt(network.contract_address, handle)
                    .await?
            }
            DecryptStrategy::User => {
                coordinator
                    .user_decrypt(handle, network.contract_address, self.transport.as_ref())
                    .await?
            }
        };

        if !self.displayed.apply_cleartext(&ticket, handle, cleartext) {
            tracing::debug!(handle = %handle, "Discarding stale decryption result");
            return Ok(None);
        }
        Ok(Some(cleartext))
    }

    /// Follow the wallet to its current chain.
    ///
    /// Drops the previous chain's instance and retargets the balance view,
    /// which discards any result still in flight for the old chain.
    pub async fn switch_network(&self) -> Result<NetworkContext, ClientError> {
        let chain_id = self.transport.chain_id().await?;
        let previous = self.chain_id.swap(chain_id, Ordering::SeqCst);
        if previous != chain_id {
            self.factory.forget(previous);
            tracing::info!(from = previous, to = chain_id, "Switched network");
        }
        self.displayed.retarget(ViewKey {
            chain_id,
            account: self.account,
        });
        self.network()
    }

    /// Register a plant; the ledger credits one point for it.
    pub async fn create_plant(&self, plant: &NewPlant) -> Result<TxReceipt, ClientError> {
        let network = self.network()?;
        let receipt = self.ledger.create_plant(network.contract_address, plant).await?;
        let receipt = self.confirmed(&network, "create_plant", receipt)?;
        self.refresh_after("create_plant").await;
        Ok(receipt)
    }

    /// Append a growth log to one of the account's plants; the ledger
    /// credits its point.
    pub async fn add_growth_log(
        &self,
        plant_id: PlantId,
        text: &str,
        image_id: &str,
    ) -> Result<TxReceipt, ClientError> {
        let network = self.network()?;
        let receipt = self
            .ledger
            .add_growth_log(network.contract_address, plant_id, text, image_id)
            .await?;
        let receipt = self.confirmed(&network, "add_growth_log", receipt)?;
        self.refresh_after("add_growth_log").await;
        Ok(receipt)
    }

    pub async fn mint_plant_nft(&self, plant_id: PlantId) -> Result<TxReceipt, ClientError> {
        let network = self.network()?;
        let receipt = self
            .ledger
            .mint_plant_nft(network.contract_address, plant_id)
            .await?;
        self.confirmed(&network, "mint_plant_nft", receipt)
    }

    pub async fn plant(&self, plant_id: PlantId) -> Result<PlantRecord, ClientError> {
        let network = self.network()?;
        Ok(self.ledger.get_plant(network.contract_address, plant_id).await?)
    }

    pub async fn growth_logs(&self, plant_id: PlantId) -> Result<Vec<GrowthLogEntry>, ClientError> {
        let network = self.network()?;
        Ok(self
            .ledger
            .get_growth_logs(network.contract_address, plant_id)
            .await?)
    }

    /// Plants owned by the connected account.
    pub async fn my_plants(&self) -> Result<Vec<PlantId>, ClientError> {
        let network = self.network()?;
        Ok(self
            .ledger
            .get_my_plants(network.contract_address, self.account)
            .await?)
    }

    pub async fn is_minted(&self, plant_id: PlantId) -> Result<bool, ClientError> {
        let network = self.network()?;
        Ok(self
            .ledger
            .plant_minted(network.contract_address, plant_id)
            .await?)
    }

    /// Point log of a plant. Non-owners get `CallRejected` until they pay.
    pub async fn point_logs(&self, plant_id: PlantId) -> Result<Vec<PointsLedgerEntry>, ClientError> {
        let network = self.network()?;
        Ok(self
            .ledger
            .get_plant_point_logs(network.contract_address, plant_id)
            .await?)
    }

    /// Pay the view fee for a plant's point log.
    pub async fn pay_to_view_point_logs(&self, plant_id: PlantId) -> Result<TxReceipt, ClientError> {
        let network = self.network()?;
        let receipt = self
            .ledger
            .pay_to_view_point_logs(
                network.contract_address,
                plant_id,
                U256::from(POINT_LOG_VIEW_FEE_WEI),
            )
            .await?;
        self.confirmed(&network, "pay_to_view_point_logs", receipt)
    }

    /// Pay the view fee, then read the point log.
    pub async fn load_point_logs(&self, plant_id: PlantId) -> Result<Vec<PointsLedgerEntry>, ClientError> {
        self.pay_to_view_point_logs(plant_id).await?;
        self.point_logs(plant_id).await
    }
}
