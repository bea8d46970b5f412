// src/chain.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use tracing::debug;

use crate::codec;
use crate::contracts::entry_point::EntryPoint;
use crate::contracts::legacy_paymaster::LegacySponsorPaymaster;
use crate::contracts::paymaster::SponsorPaymaster;
use crate::error::ChainError;
use crate::types::{ValidityWindow, VersionedOperation};

/// Read-only chain state the protocol depends on.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// EntryPoint nonce for key 0.
    async fn account_nonce(&self, entry_point: Address, sender: Address) -> Result<U256, ChainError>;

    /// Deposit held by the EntryPoint on behalf of `account`.
    async fn deposit_of(&self, entry_point: Address, account: Address) -> Result<U256, ChainError>;

    /// Bond an account has placed with the sponsorship authority.
    async fn bond_of(&self, paymaster: Address, account: Address) -> Result<U256, ChainError>;
}

/// The verifying paymaster's own hash over an operation and window.
#[async_trait]
pub trait EndorsementHasher: Send + Sync {
    async fn endorsement_hash(
        &self,
        paymaster: Address,
        op: &VersionedOperation,
        window: ValidityWindow,
    ) -> Result<H256, ChainError>;
}

fn contract_error<E: std::fmt::Display>(e: E) -> ChainError {
    ChainError::Contract(e.to_string())
}

pub struct OnchainReader {
    client: Arc<Provider<Http>>,
}

impl OnchainReader {
    pub fn new(client: Arc<Provider<Http>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChainReader for OnchainReader {
    async fn account_nonce(&self, entry_point: Address, sender: Address) -> Result<U256, ChainError> {
        EntryPoint::new(entry_point, self.client.clone())
            .get_nonce(sender, U256::zero())
            .call()
            .await
            .map_err(contract_error)
    }

    async fn deposit_of(&self, entry_point: Address, account: Address) -> Result<U256, ChainError> {
        let deposit = EntryPoint::new(entry_point, self.client.clone())
            .balance_of(account)
            .call()
            .await
            .map_err(contract_error)?;
        debug!("EntryPoint deposit of {}: {}", account, deposit);
        Ok(deposit)
    }

    async fn bond_of(&self, paymaster: Address, account: Address) -> Result<U256, ChainError> {
        SponsorPaymaster::new(paymaster, self.client.clone())
            .bond_of(account)
            .call()
            .await
            .map_err(contract_error)
    }
}

#[async_trait]
impl EndorsementHasher for OnchainReader {
    async fn endorsement_hash(
        &self,
        paymaster: Address,
        op: &VersionedOperation,
        window: ValidityWindow,
    ) -> Result<H256, ChainError> {
        let hash = match op {
            VersionedOperation::V0_7(op) => {
                let packed = codec::pack(op).map_err(contract_error)?;
                SponsorPaymaster::new(paymaster, self.client.clone())
                    .get_hash((&packed).into(), window.valid_until, window.valid_after)
                    .call()
                    .await
                    .map_err(contract_error)?
            }
            VersionedOperation::V0_6(op) => {
                LegacySponsorPaymaster::new(paymaster, self.client.clone())
                    .get_hash(op.into(), window.valid_until, window.valid_after)
                    .call()
                    .await
                    .map_err(contract_error)?
            }
        };
        Ok(H256(hash))
    }
}
