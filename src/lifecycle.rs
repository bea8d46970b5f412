// src/lifecycle.rs
//! Drives one user-initiated send from fee lookup to a confirmed receipt.
//!
//! Sponsorship modes are tried in the configured order. A mode that fails
//! before the owner signs may hand over to the next one; once an operation
//! has been signed, the run ends with that attempt's result.

use std::sync::Arc;

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::parse_ether;
use tracing::{debug, error, info, warn};

use crate::chain::ChainReader;
use crate::encoder::CallEncoder;
use crate::error::{ChainError, RelayError, SignerError, SponsorshipError};
use crate::gas::{FeeTier, GasOracle};
use crate::relay::Bundler;
use crate::signer::{BondFunder, OwnerSigner};
use crate::sponsorship::{SponsorshipMode, SponsorshipNegotiator};
use crate::types::{UserOperation, DUMMY_SIGNATURE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InputValidation,
    NetworkUnavailable,
    InsufficientFunds,
    PolicyRejected,
    SignatureRejected,
    ProtocolMismatch,
    Timeout,
    Reverted,
}

impl FailureKind {
    /// Whether a later strategy may still succeed where this one failed.
    fn allows_fallback(self) -> bool {
        matches!(
            self,
            FailureKind::NetworkUnavailable
                | FailureKind::InsufficientFunds
                | FailureKind::PolicyRejected
        )
    }

    fn user_message(self) -> &'static str {
        match self {
            FailureKind::InputValidation => "The transfer request is invalid.",
            FailureKind::NetworkUnavailable => "A network service is unreachable. Please try again.",
            FailureKind::InsufficientFunds => "The fee payer does not have enough funds for this transfer.",
            FailureKind::PolicyRejected => "The sponsor does not cover this transfer.",
            FailureKind::SignatureRejected => "Signing was cancelled.",
            FailureKind::ProtocolMismatch => "The transfer could not be prepared due to an internal error.",
            FailureKind::Timeout => "The relay did not confirm the transfer in time.",
            FailureKind::Reverted => "The transfer was included but reverted.",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Preparing,
    AwaitingEndorsement,
    Signing,
    Submitted,
    Confirmed,
    /// Self-paid sponsorship requested before the account bonded.
    NotBonded,
    Failed(FailureKind),
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Confirmed | LifecycleState::NotBonded | LifecycleState::Failed(_)
        )
    }

    pub fn can_transition_to(&self, next: &LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, Failed(_)) => true,
            (Idle, Preparing)
            | (Preparing, AwaitingEndorsement)
            | (Preparing, NotBonded)
            | (AwaitingEndorsement, Signing)
            | (Signing, Submitted)
            | (Submitted, Confirmed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Failed(kind) => write!(f, "Failed({kind})"),
            other => std::fmt::Debug::fmt(other, f),
        }
    }
}

/// A classified failure: the structured reason plus what to show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            message: kind.user_message().to_string(),
            detail: detail.into(),
        }
    }
}

impl From<&RelayError> for FailureKind {
    fn from(e: &RelayError) -> Self {
        match e {
            RelayError::Transport(_) => FailureKind::NetworkUnavailable,
            RelayError::Malformed(_) => FailureKind::ProtocolMismatch,
            RelayError::Timeout => FailureKind::Timeout,
            // ERC-4337 bundler error codes
            RelayError::Rejected { code, .. } => match *code {
                -32602 | -32500 | -32502 | -32503 | -32506 | -32507 => FailureKind::InputValidation,
                -32501 | -32504 => FailureKind::PolicyRejected,
                -32505 => FailureKind::InsufficientFunds,
                _ => FailureKind::NetworkUnavailable,
            },
        }
    }
}

impl From<&SponsorshipError> for FailureKind {
    fn from(e: &SponsorshipError) -> Self {
        match e {
            SponsorshipError::EndorsementUnavailable(_) => FailureKind::NetworkUnavailable,
            SponsorshipError::InsufficientSponsorBalance(_) => FailureKind::InsufficientFunds,
            SponsorshipError::PolicyLimitExceeded(_) => FailureKind::PolicyRejected,
            SponsorshipError::SignatureFailure(_) => FailureKind::SignatureRejected,
            SponsorshipError::InvalidOperation(_) | SponsorshipError::Codec(_) => {
                FailureKind::InputValidation
            }
            SponsorshipError::ProtocolMismatch(_) => FailureKind::ProtocolMismatch,
            SponsorshipError::Relay(relay) => relay.into(),
            SponsorshipError::Chain(_) => FailureKind::NetworkUnavailable,
        }
    }
}

impl From<SponsorshipError> for Failure {
    fn from(e: SponsorshipError) -> Self {
        Failure::new((&e).into(), e.to_string())
    }
}

impl From<RelayError> for Failure {
    fn from(e: RelayError) -> Self {
        Failure::new((&e).into(), e.to_string())
    }
}

impl From<ChainError> for Failure {
    fn from(e: ChainError) -> Self {
        Failure::new(FailureKind::NetworkUnavailable, e.to_string())
    }
}

impl From<SignerError> for Failure {
    fn from(e: SignerError) -> Self {
        Failure::new(FailureKind::SignatureRejected, e.to_string())
    }
}

/// A native-value transfer (optionally with call data) from the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl SendRequest {
    pub fn native_transfer(to: Address, value: U256) -> Self {
        Self {
            to,
            value,
            data: Bytes::default(),
        }
    }

    /// Parses a `0x`-prefixed 42-character recipient and a decimal amount in
    /// ether units.
    pub fn parse(to: &str, amount: &str) -> Result<Self, Failure> {
        let to = to.trim();
        if to.len() != 42 || !to.starts_with("0x") {
            return Err(Failure::new(
                FailureKind::InputValidation,
                format!("recipient {to:?} is not a 42-character address"),
            ));
        }
        let to: Address = to
            .parse()
            .map_err(|e| Failure::new(FailureKind::InputValidation, format!("recipient: {e}")))?;
        let value = parse_ether(amount.trim())
            .map_err(|e| Failure::new(FailureKind::InputValidation, format!("amount: {e}")))?;
        Ok(Self::native_transfer(to, value))
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// The smart account sending operations.
    pub sender: Address,
    pub entry_point: Address,
    pub chain_id: u64,
    pub fee_tier: FeeTier,
    /// Sponsorship strategies, tried in order.
    pub strategies: Vec<SponsorshipMode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub mode: SponsorshipMode,
    pub history: Vec<LifecycleState>,
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub state: LifecycleState,
    pub failure: Option<Failure>,
    pub mode: Option<SponsorshipMode>,
    pub user_op_hash: Option<H256>,
    pub transaction_hash: Option<H256>,
    pub attempts: Vec<AttemptRecord>,
}

impl SendOutcome {
    pub fn is_confirmed(&self) -> bool {
        self.state == LifecycleState::Confirmed
    }

    /// Text for the UI layer.
    pub fn status_message(&self) -> String {
        match (&self.state, &self.failure) {
            (LifecycleState::Confirmed, _) => match self.transaction_hash {
                Some(hash) => format!("Transfer confirmed in transaction {hash:?}."),
                None => "Transfer confirmed.".to_string(),
            },
            (LifecycleState::NotBonded, _) => {
                "This account must be bonded with the sponsorship authority before paying its own fees."
                    .to_string()
            }
            (_, Some(failure)) => failure.message.clone(),
            (state, None) => format!("Transfer is {state}."),
        }
    }
}

struct Tracker {
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl Tracker {
    fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            history: vec![LifecycleState::Idle],
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        if !self.state.can_transition_to(&next) {
            error!("Invalid lifecycle transition {} -> {}", self.state, next);
        }
        debug!("Lifecycle {} -> {}", self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }
}

/// How one strategy attempt ended.
enum AttemptEnd {
    Confirmed { user_op_hash: H256, transaction_hash: H256 },
    NotBonded,
    /// Failed before the owner was asked to sign.
    BeforeSigning(Failure),
    /// Failed at or after signing; no further strategy may run.
    AfterSigning(Failure, Option<H256>),
}

pub struct LifecycleDriver {
    gas: Arc<dyn GasOracle>,
    bundler: Arc<dyn Bundler>,
    chain: Arc<dyn ChainReader>,
    negotiator: SponsorshipNegotiator,
    signer: Arc<dyn OwnerSigner>,
    encoder: Arc<dyn CallEncoder>,
    config: DriverConfig,
}

impl LifecycleDriver {
    pub fn new(
        gas: Arc<dyn GasOracle>,
        bundler: Arc<dyn Bundler>,
        chain: Arc<dyn ChainReader>,
        negotiator: SponsorshipNegotiator,
        signer: Arc<dyn OwnerSigner>,
        encoder: Arc<dyn CallEncoder>,
        config: DriverConfig,
    ) -> Self {
        Self {
            gas,
            bundler,
            chain,
            negotiator,
            signer,
            encoder,
            config,
        }
    }

    /// Runs the send to a terminal state. Never panics on collaborator
    /// failures; every failure is classified in the outcome.
    pub async fn send(&self, request: &SendRequest) -> SendOutcome {
        let mut attempts = Vec::new();

        let mut strategies = self.config.strategies.iter().copied().peekable();
        while let Some(mode) = strategies.next() {
            info!("Sending {} wei to {} ({})", request.value, request.to, mode);
            let mut tracker = Tracker::new();
            let end = self.attempt(request, mode, &mut tracker).await;

            let (failure, user_op_hash, transaction_hash, can_fall_back) = match end {
                AttemptEnd::Confirmed { user_op_hash, transaction_hash } => {
                    (None, Some(user_op_hash), Some(transaction_hash), false)
                }
                AttemptEnd::NotBonded => (None, None, None, true),
                AttemptEnd::BeforeSigning(failure) => {
                    let fallback = failure.kind.allows_fallback();
                    (Some(failure), None, None, fallback)
                }
                AttemptEnd::AfterSigning(failure, user_op_hash) => {
                    (Some(failure), user_op_hash, None, false)
                }
            };

            if let Some(failure) = &failure {
                warn!("{} attempt failed: {} ({})", mode, failure.kind, failure.detail);
            }
            attempts.push(AttemptRecord {
                mode,
                history: tracker.history,
                failure: failure.clone(),
            });

            if can_fall_back && strategies.peek().is_some() {
                info!("Falling back from {} strategy", mode);
                continue;
            }

            return SendOutcome {
                state: tracker.state,
                failure,
                mode: Some(mode),
                user_op_hash,
                transaction_hash,
                attempts,
            };
        }

        let failure =
            Failure::new(FailureKind::InputValidation, "no sponsorship strategy configured");
        SendOutcome {
            state: LifecycleState::Failed(failure.kind),
            failure: Some(failure),
            mode: None,
            user_op_hash: None,
            transaction_hash: None,
            attempts,
        }
    }

    async fn attempt(
        &self,
        request: &SendRequest,
        mode: SponsorshipMode,
        tracker: &mut Tracker,
    ) -> AttemptEnd {
        tracker.advance(LifecycleState::Preparing);

        let before_signing = |tracker: &mut Tracker, failure: Failure| {
            tracker.advance(LifecycleState::Failed(failure.kind));
            AttemptEnd::BeforeSigning(failure)
        };

        if mode == SponsorshipMode::SelfPaid {
            match self.is_bonded().await {
                Ok(true) => {}
                Ok(false) => {
                    tracker.advance(LifecycleState::NotBonded);
                    return AttemptEnd::NotBonded;
                }
                Err(failure) => return before_signing(tracker, failure),
            }
        }

        let mut op = match self.draft(request).await {
            Ok(op) => op,
            Err(failure) => return before_signing(tracker, failure),
        };

        tracker.advance(LifecycleState::AwaitingEndorsement);
        let endorsed = match self.endorse(&mut op, mode).await {
            Ok(endorsed) => endorsed,
            Err(failure) => return before_signing(tracker, failure),
        };

        tracker.advance(LifecycleState::Signing);
        let signed = match endorsed
            .sign(self.signer.as_ref(), self.config.entry_point, self.config.chain_id)
            .await
        {
            Ok(signed) => signed,
            Err(e) => {
                let failure = Failure::from(e);
                tracker.advance(LifecycleState::Failed(failure.kind));
                return AttemptEnd::AfterSigning(failure, None);
            }
        };

        let after_signing = |tracker: &mut Tracker, failure: Failure, hash: Option<H256>| {
            tracker.advance(LifecycleState::Failed(failure.kind));
            AttemptEnd::AfterSigning(failure, hash)
        };

        let user_op_hash = match self
            .bundler
            .send_user_operation(&signed.op, self.config.entry_point)
            .await
        {
            Ok(hash) => hash,
            Err(e) => return after_signing(tracker, e.into(), None),
        };
        if user_op_hash != signed.user_op_hash {
            warn!(
                "Relay returned hash {:?}, expected {:?}",
                user_op_hash, signed.user_op_hash
            );
        }
        tracker.advance(LifecycleState::Submitted);

        let receipt = match self.bundler.wait_for_receipt(user_op_hash).await {
            Ok(receipt) => receipt,
            Err(e) => return after_signing(tracker, e.into(), Some(user_op_hash)),
        };

        if !receipt.success {
            let failure = Failure::new(
                FailureKind::Reverted,
                receipt.reason.unwrap_or_else(|| "operation reverted".to_string()),
            );
            return after_signing(tracker, failure, Some(user_op_hash));
        }

        tracker.advance(LifecycleState::Confirmed);
        info!(
            "Operation {:?} confirmed in {:?}",
            user_op_hash, receipt.receipt.transaction_hash
        );
        AttemptEnd::Confirmed {
            user_op_hash,
            transaction_hash: receipt.receipt.transaction_hash,
        }
    }

    /// Fresh fees and nonce, call data from the encoder, placeholder signature.
    async fn draft(&self, request: &SendRequest) -> Result<UserOperation, Failure> {
        let tiers = self.gas.gas_price().await?;
        let fees = tiers.select(self.config.fee_tier);
        let nonce = self
            .chain
            .account_nonce(self.config.entry_point, self.config.sender)
            .await?;

        Ok(UserOperation {
            sender: self.config.sender,
            nonce,
            call_data: self
                .encoder
                .encode_call(request.to, request.value, &request.data),
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            signature: Bytes::from(DUMMY_SIGNATURE.to_vec()),
            ..Default::default()
        })
    }

    async fn endorse(
        &self,
        op: &mut UserOperation,
        mode: SponsorshipMode,
    ) -> Result<crate::sponsorship::EndorsedOperation, Failure> {
        self.negotiator.attach_stub(op, mode).await?;

        let estimate = self
            .bundler
            .estimate_user_operation_gas(op, self.config.entry_point)
            .await?;
        self.negotiator.apply_gas_estimate(op, &estimate, mode);

        Ok(self.negotiator.finalize(op.clone(), mode).await?)
    }

    /// Whether the account has bonded with the self-paid sponsorship authority.
    pub async fn is_bonded(&self) -> Result<bool, Failure> {
        let paymaster = self.negotiator.config().self_paid_paymaster;
        let bond = self.chain.bond_of(paymaster, self.config.sender).await?;
        debug!("Bond of {} with {}: {}", self.config.sender, paymaster, bond);
        Ok(!bond.is_zero())
    }

    /// Sends the bonding deposit from the owner key directly.
    pub async fn bond(&self, funder: &dyn BondFunder, value: U256) -> Result<H256, Failure> {
        if value.is_zero() {
            return Err(Failure::new(FailureKind::InputValidation, "bond value must be positive"));
        }
        let paymaster = self.negotiator.config().self_paid_paymaster;
        Ok(funder.fund_bond(paymaster, self.config.sender, value).await?)
    }
}
