// src/sponsorship.rs
//! Obtains sponsorship fields for a prepared operation and enforces that the
//! owner signs only after the final fields are attached.

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::chain::ChainReader;
use crate::codec;
use crate::error::SponsorshipError;
use crate::paymaster::{decode_paymaster_data, MODE_SELF_PAID};
use crate::rpc::{
    INSUFFICIENT_SPONSOR_BALANCE, INVALID_PARAMS, INVALID_REQUEST, POLICY_LIMIT_EXCEEDED,
};
use crate::signer::OwnerSigner;
use crate::types::{
    EntryPointVersion, GasEstimate, PaymasterResponse, SponsorshipEnvelope, UserOperation,
};

/// Paymaster verification gas for self-paid operations, tuned against the
/// verifier's self-payment branch.
pub const SELF_PAID_VERIFICATION_GAS_LIMIT: u64 = 75_000;
pub const SELF_PAID_POST_OP_GAS_LIMIT: u64 = 45_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SponsorshipMode {
    /// The account pays from its bond with the sponsorship authority.
    SelfPaid,
    /// A sponsor endorses and pays.
    SponsorPaid,
}

impl std::fmt::Display for SponsorshipMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SponsorshipMode::SelfPaid => write!(f, "self-paid"),
            SponsorshipMode::SponsorPaid => write!(f, "sponsor-paid"),
        }
    }
}

/// Sponsorship fields for a v0.7 operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorshipFields {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
}

impl SponsorshipFields {
    fn apply(&self, op: &mut UserOperation) {
        op.paymaster = Some(self.paymaster);
        op.paymaster_data = self.paymaster_data.clone();
        op.paymaster_verification_gas_limit = self.paymaster_verification_gas_limit;
        op.paymaster_post_op_gas_limit = self.paymaster_post_op_gas_limit;
    }
}

/// The fixed self-paid sponsorship: marker payload and pre-agreed limits,
/// whatever the operation contains.
pub fn self_paid_fields(paymaster: Address) -> SponsorshipFields {
    SponsorshipFields {
        paymaster,
        paymaster_data: Bytes::from(vec![MODE_SELF_PAID]),
        paymaster_verification_gas_limit: U256::from(SELF_PAID_VERIFICATION_GAS_LIMIT),
        paymaster_post_op_gas_limit: U256::from(SELF_PAID_POST_OP_GAS_LIMIT),
    }
}

/// The remote endorsement service, as seen by the negotiator.
#[async_trait]
pub trait EndorsementSource: Send + Sync {
    async fn stub_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        context: Option<&Value>,
    ) -> Result<PaymasterResponse, SponsorshipError>;

    async fn final_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        context: Option<&Value>,
    ) -> Result<PaymasterResponse, SponsorshipError>;
}

fn endorsement_error(e: ProviderError) -> SponsorshipError {
    if let Some(response) = e.as_error_response() {
        let message = response.message.clone();
        return match response.code as i32 {
            INSUFFICIENT_SPONSOR_BALANCE => SponsorshipError::InsufficientSponsorBalance(message),
            POLICY_LIMIT_EXCEEDED => SponsorshipError::PolicyLimitExceeded(message),
            INVALID_PARAMS | INVALID_REQUEST => SponsorshipError::InvalidOperation(message),
            _ => SponsorshipError::EndorsementUnavailable(message),
        };
    }
    SponsorshipError::EndorsementUnavailable(e.to_string())
}

/// JSON-RPC client for `pm_getPaymasterStubData` / `pm_getPaymasterData`.
pub struct RemoteEndorser {
    client: Arc<Provider<Http>>,
}

impl RemoteEndorser {
    pub fn new(client: Arc<Provider<Http>>) -> Self {
        Self { client }
    }

    async fn call(
        &self,
        method: &str,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        context: Option<&Value>,
    ) -> Result<PaymasterResponse, SponsorshipError> {
        let params = json!([op, entry_point, format!("{chain_id:#x}"), context]);
        self.client
            .request(method, params)
            .await
            .map_err(endorsement_error)
    }
}

#[async_trait]
impl EndorsementSource for RemoteEndorser {
    async fn stub_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        context: Option<&Value>,
    ) -> Result<PaymasterResponse, SponsorshipError> {
        self.call("pm_getPaymasterStubData", op, entry_point, chain_id, context)
            .await
    }

    async fn final_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: u64,
        context: Option<&Value>,
    ) -> Result<PaymasterResponse, SponsorshipError> {
        self.call("pm_getPaymasterData", op, entry_point, chain_id, context)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    pub entry_point: Address,
    pub chain_id: u64,
    /// Sponsorship authority used for self-paid operations.
    pub self_paid_paymaster: Address,
    /// Sponsor deposit required before a sponsor-paid endorsement is
    /// requested. Zero disables the check.
    pub min_sponsor_deposit: U256,
    pub context: Option<Value>,
}

/// An operation whose final sponsorship fields are attached. Only
/// [`SponsorshipNegotiator::finalize`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndorsedOperation {
    op: UserOperation,
    mode: SponsorshipMode,
}

impl EndorsedOperation {
    pub fn operation(&self) -> &UserOperation {
        &self.op
    }

    pub fn mode(&self) -> SponsorshipMode {
        self.mode
    }

    /// Has the owner sign the canonical hash of the fully endorsed operation.
    pub async fn sign(
        self,
        signer: &dyn OwnerSigner,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<SignedOperation, SponsorshipError> {
        let user_op_hash = codec::user_operation_hash(&self.op, entry_point, chain_id)?;
        let signature = signer
            .sign_user_op_hash(user_op_hash)
            .await
            .map_err(|e| SponsorshipError::SignatureFailure(e.to_string()))?;

        let mut op = self.op;
        op.signature = signature;
        Ok(SignedOperation { op, user_op_hash })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOperation {
    pub op: UserOperation,
    pub user_op_hash: H256,
}

pub struct SponsorshipNegotiator {
    endorser: Arc<dyn EndorsementSource>,
    chain: Arc<dyn ChainReader>,
    config: NegotiatorConfig,
}

impl SponsorshipNegotiator {
    pub fn new(
        endorser: Arc<dyn EndorsementSource>,
        chain: Arc<dyn ChainReader>,
        config: NegotiatorConfig,
    ) -> Self {
        Self {
            endorser,
            chain,
            config,
        }
    }

    pub fn config(&self) -> &NegotiatorConfig {
        &self.config
    }

    /// Attaches estimation-grade sponsorship. Self-paid is local; sponsor-paid
    /// asks the service for a stub and checks the sponsor's deposit.
    pub async fn attach_stub(
        &self,
        op: &mut UserOperation,
        mode: SponsorshipMode,
    ) -> Result<(), SponsorshipError> {
        match mode {
            SponsorshipMode::SelfPaid => {
                self_paid_fields(self.config.self_paid_paymaster).apply(op);
                Ok(())
            }
            SponsorshipMode::SponsorPaid => {
                let reply = self
                    .endorser
                    .stub_data(
                        op,
                        self.config.entry_point,
                        self.config.chain_id,
                        self.config.context.as_ref(),
                    )
                    .await?;
                if reply.is_final {
                    debug!("Stub reply marked final; final endorsement still requested");
                }
                let fields = self.resolve_envelope(reply.envelope)?;
                self.check_sponsor_deposit(fields.paymaster).await?;
                fields.apply(op);
                Ok(())
            }
        }
    }

    /// Folds the relay's estimate into the draft. Self-paid keeps its fixed
    /// paymaster limits.
    pub fn apply_gas_estimate(
        &self,
        op: &mut UserOperation,
        estimate: &GasEstimate,
        mode: SponsorshipMode,
    ) {
        op.call_gas_limit = estimate.call_gas_limit;
        op.verification_gas_limit = estimate.verification_gas_limit;
        op.pre_verification_gas = estimate.pre_verification_gas;

        if mode == SponsorshipMode::SponsorPaid {
            if let Some(limit) = estimate.paymaster_verification_gas_limit {
                op.paymaster_verification_gas_limit = limit;
            }
            if let Some(limit) = estimate.paymaster_post_op_gas_limit {
                op.paymaster_post_op_gas_limit = limit;
            }
        }
    }

    /// Attaches the final sponsorship. The returned operation is the only
    /// thing the owner may sign.
    pub async fn finalize(
        &self,
        mut op: UserOperation,
        mode: SponsorshipMode,
    ) -> Result<EndorsedOperation, SponsorshipError> {
        match mode {
            SponsorshipMode::SelfPaid => {
                self_paid_fields(self.config.self_paid_paymaster).apply(&mut op);
            }
            SponsorshipMode::SponsorPaid => {
                let reply = self
                    .endorser
                    .final_data(
                        &op,
                        self.config.entry_point,
                        self.config.chain_id,
                        self.config.context.as_ref(),
                    )
                    .await?;
                if !reply.is_final {
                    return Err(self.mismatch("final endorsement reply not marked final"));
                }

                let fields = self.resolve_envelope(reply.envelope)?;
                match decode_paymaster_data(&fields.paymaster_data) {
                    Some(endorsement) if endorsement.window.is_well_formed() => {
                        info!(
                            "Sponsor {} endorsed operation until {}",
                            endorsement.signer, endorsement.window.valid_until
                        );
                    }
                    _ => return Err(self.mismatch("malformed sponsorship payload")),
                }
                fields.apply(&mut op);
            }
        }
        Ok(EndorsedOperation { op, mode })
    }

    fn resolve_envelope(
        &self,
        envelope: SponsorshipEnvelope,
    ) -> Result<SponsorshipFields, SponsorshipError> {
        let expected = EntryPointVersion::detect(self.config.entry_point);
        match envelope {
            SponsorshipEnvelope::V0_7 {
                paymaster,
                paymaster_data,
                paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit,
            } if expected == Some(EntryPointVersion::V0_7) => Ok(SponsorshipFields {
                paymaster,
                paymaster_data,
                paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit,
            }),
            other => Err(self.mismatch(&format!(
                "{} reply for entry point {:?}",
                other.version(),
                self.config.entry_point
            ))),
        }
    }

    async fn check_sponsor_deposit(&self, paymaster: Address) -> Result<(), SponsorshipError> {
        if self.config.min_sponsor_deposit.is_zero() {
            return Ok(());
        }
        let deposit = self
            .chain
            .deposit_of(self.config.entry_point, paymaster)
            .await?;
        if deposit < self.config.min_sponsor_deposit {
            return Err(SponsorshipError::InsufficientSponsorBalance(format!(
                "sponsor {} holds {} wei, {} required",
                paymaster, deposit, self.config.min_sponsor_deposit
            )));
        }
        Ok(())
    }

    fn mismatch(&self, detail: &str) -> SponsorshipError {
        error!(
            "Sponsorship protocol mismatch: {} (entry point {:?}, chain {})",
            detail, self.config.entry_point, self.config.chain_id
        );
        SponsorshipError::ProtocolMismatch(detail.to_string())
    }
}
