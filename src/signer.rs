// src/signer.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use tracing::info;

use crate::contracts::paymaster::SponsorPaymaster;
use crate::error::SignerError;

/// The account owner's key, as far as the protocol needs it.
#[async_trait]
pub trait OwnerSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Signs an operation hash (EIP-191 personal message over the 32 bytes).
    async fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes, SignerError>;
}

/// Sends the bonding deposit directly from the owner's externally owned
/// account, outside the smart account.
#[async_trait]
pub trait BondFunder: Send + Sync {
    async fn fund_bond(
        &self,
        paymaster: Address,
        account: Address,
        value: U256,
    ) -> Result<H256, SignerError>;
}

pub struct WalletSigner {
    wallet: LocalWallet,
    client: Arc<Provider<Http>>,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet, chain_id: u64, client: Arc<Provider<Http>>) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
            client,
        }
    }
}

#[async_trait]
impl OwnerSigner for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes, SignerError> {
        let signature = self
            .wallet
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(Bytes::from(signature.to_vec()))
    }
}

#[async_trait]
impl BondFunder for WalletSigner {
    async fn fund_bond(
        &self,
        paymaster: Address,
        account: Address,
        value: U256,
    ) -> Result<H256, SignerError> {
        let client = Arc::new(SignerMiddleware::new(
            self.client.as_ref().clone(),
            self.wallet.clone(),
        ));
        let call = SponsorPaymaster::new(paymaster, client)
            .bond(account)
            .value(value);
        let pending = call
            .send()
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        let tx_hash = *pending;
        let receipt = pending
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?
            .ok_or_else(|| SignerError::Failed(format!("bond transaction {tx_hash:?} dropped")))?;

        if receipt.status != Some(U64::from(1)) {
            return Err(SignerError::Failed(format!("bond transaction {tx_hash:?} reverted")));
        }
        info!("Bonded {} wei for {} in {:?}", value, account, tx_hash);
        Ok(tx_hash)
    }
}
