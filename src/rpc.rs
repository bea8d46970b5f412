// src/rpc.rs
use std::sync::Arc;

use ethers::types::Address;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::ErrorObject;
use jsonrpsee::types::ErrorObjectOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::EndorsementError;
use crate::paymaster::Paymaster;
use crate::types::PaymasterResponse;

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const INSUFFICIENT_SPONSOR_BALANCE: i32 = -32010;
pub const POLICY_LIMIT_EXCEEDED: i32 = -32011;

#[rpc(server, namespace = "pm")]
pub trait PaymasterRpc {
    /// Placeholder sponsorship used while the relay estimates gas
    #[method(name = "getPaymasterStubData")]
    async fn get_paymaster_stub_data(
        &self,
        user_op: Option<Value>,
        entry_point: Option<Address>,
        chain_id: Option<Value>,
        ctx: Option<Value>,
    ) -> RpcResult<PaymasterResponse>;

    /// Signed sponsorship for a fully estimated operation
    #[method(name = "getPaymasterData")]
    async fn get_paymaster_data(
        &self,
        user_op: Option<Value>,
        entry_point: Option<Address>,
        chain_id: Option<Value>,
        ctx: Option<Value>,
    ) -> RpcResult<PaymasterResponse>;
}

/// Maps a service failure onto its JSON-RPC error object.
pub fn rpc_error(e: &EndorsementError) -> ErrorObjectOwned {
    let (code, data) = match e {
        EndorsementError::InvalidRequest(_) => (INVALID_REQUEST, None),
        EndorsementError::InvalidParams(_) => (INVALID_PARAMS, None),
        EndorsementError::ProtocolMismatch(_) => (INVALID_PARAMS, None),
        EndorsementError::InsufficientSponsorBalance(_) => (INSUFFICIENT_SPONSOR_BALANCE, None),
        EndorsementError::PolicyLimitExceeded(_) => (POLICY_LIMIT_EXCEEDED, None),
        EndorsementError::RegistryUnavailable(raw)
        | EndorsementError::Signing(raw)
        | EndorsementError::Internal(raw) => (INTERNAL_ERROR, Some(raw.clone())),
        EndorsementError::Chain(raw) => (INTERNAL_ERROR, Some(raw.to_string())),
    };
    ErrorObject::owned(code, e.to_string(), data)
}

pub struct PaymasterRpcImpl {
    paymaster: Arc<Paymaster>,
}

impl PaymasterRpcImpl {
    pub fn new(paymaster: Arc<Paymaster>) -> Self {
        Self { paymaster }
    }

    fn fail(&self, method: &str, e: EndorsementError) -> ErrorObjectOwned {
        match &e {
            EndorsementError::ProtocolMismatch(_) => error!("{} protocol mismatch: {}", method, e),
            EndorsementError::InvalidRequest(_) | EndorsementError::InvalidParams(_) => {
                debug!("{} rejected: {}", method, e)
            }
            _ => warn!("{} failed: {}", method, e),
        }
        rpc_error(&e)
    }
}

#[async_trait]
impl PaymasterRpcServer for PaymasterRpcImpl {
    async fn get_paymaster_stub_data(
        &self,
        user_op: Option<Value>,
        entry_point: Option<Address>,
        chain_id: Option<Value>,
        ctx: Option<Value>,
    ) -> RpcResult<PaymasterResponse> {
        const METHOD: &str = "pm_getPaymasterStubData";
        debug!("{} context: {:?}", METHOD, ctx);

        let request = self
            .paymaster
            .parse_request(user_op, entry_point, chain_id)
            .map_err(|e| self.fail(METHOD, e))?;
        let response = self
            .paymaster
            .stub_data(&request)
            .await
            .map_err(|e| self.fail(METHOD, e))?;
        Ok(response)
    }

    async fn get_paymaster_data(
        &self,
        user_op: Option<Value>,
        entry_point: Option<Address>,
        chain_id: Option<Value>,
        ctx: Option<Value>,
    ) -> RpcResult<PaymasterResponse> {
        const METHOD: &str = "pm_getPaymasterData";
        debug!("{} context: {:?}", METHOD, ctx);

        let request = self
            .paymaster
            .parse_request(user_op, entry_point, chain_id)
            .map_err(|e| self.fail(METHOD, e))?;
        let sender = request.operation.sender();

        match self.paymaster.final_data(&request).await {
            Ok(response) => {
                info!("Successfully sponsored operation for {}", sender);
                Ok(response)
            }
            Err(e) => Err(self.fail(METHOD, e).into()),
        }
    }
}
