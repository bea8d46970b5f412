// src/relay.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::{Address, H256};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::types::{GasEstimate, UserOperation, UserOperationReceipt};

/// The bundler side of the protocol: estimation, submission and settlement.
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, RelayError>;

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, RelayError>;

    /// Blocks until the relay resolves the operation. Implementations own
    /// their timeout and report it as [`RelayError::Timeout`].
    async fn wait_for_receipt(&self, user_op_hash: H256)
        -> Result<UserOperationReceipt, RelayError>;
}

pub(crate) fn relay_error(e: ProviderError) -> RelayError {
    if let Some(response) = e.as_error_response() {
        return RelayError::Rejected {
            code: response.code,
            message: response.message.clone(),
        };
    }
    match e {
        ProviderError::SerdeJson(err) => RelayError::Malformed(err.to_string()),
        other => RelayError::Transport(other.to_string()),
    }
}

pub struct BundlerClient {
    client: Arc<Provider<Http>>,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl BundlerClient {
    pub fn new(
        client: Arc<Provider<Http>>,
        poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            poll_interval,
            receipt_timeout,
        }
    }

    async fn receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, RelayError> {
        self.client
            .request("eth_getUserOperationReceipt", [user_op_hash])
            .await
            .map_err(relay_error)
    }
}

#[async_trait]
impl Bundler for BundlerClient {
    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, RelayError> {
        debug!("Estimating gas for operation from {}", op.sender);
        self.client
            .request("eth_estimateUserOperationGas", (op, entry_point))
            .await
            .map_err(relay_error)
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, RelayError> {
        let hash: H256 = self
            .client
            .request("eth_sendUserOperation", (op, entry_point))
            .await
            .map_err(relay_error)?;
        info!("Relay accepted operation {:?}", hash);
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<UserOperationReceipt, RelayError> {
        let poll = async {
            loop {
                if let Some(receipt) = self.receipt(user_op_hash).await? {
                    return Ok::<_, RelayError>(receipt);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.receipt_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!("No receipt for {:?} after {:?}", user_op_hash, self.receipt_timeout);
                Err(RelayError::Timeout)
            }
        }
    }
}
