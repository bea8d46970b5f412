// src/paymaster.rs
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::chain::{ChainReader, EndorsementHasher};
use crate::error::EndorsementError;
use crate::registry::PaymasterRegistry;
use crate::types::{
    EntryPointVersion, PaymasterResponse, SponsorInfo, SponsorshipEnvelope, UserOperation,
    UserOperationV06, ValidityWindow, VersionedOperation,
};

/// Marker payload telling the verifier the account pays for itself.
pub const MODE_SELF_PAID: u8 = 0x00;
/// Payload carries a sponsor endorsement.
pub const MODE_SPONSORED: u8 = 0x01;

pub const SIGNATURE_LEN: usize = 65;
/// Operation fields that exist in only one entry point version.
const V06_ONLY_FIELDS: &[&str] = &["initCode", "paymasterAndData"];
const V07_ONLY_FIELDS: &[&str] = &[
    "factory",
    "factoryData",
    "paymaster",
    "paymasterData",
    "paymasterVerificationGasLimit",
    "paymasterPostOpGasLimit",
];

/// mode + sponsor signer + validUntil + validAfter
const ENDORSEMENT_PREFIX_LEN: usize = 1 + 20 + 6 + 6;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub chain_id: u64,
    pub sponsor_name: String,
    /// Validity of a final endorsement, in seconds.
    pub valid_duration: u64,
    /// Percentage added to the max fee when costing an operation.
    pub gas_price_buffer: u64,
    /// Largest total cost (wei) the sponsor accepts for one operation.
    pub max_cost_per_operation: U256,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            sponsor_name: "sponsor-relay".to_string(),
            valid_duration: 3600,
            gas_price_buffer: 10,
            max_cost_per_operation: U256::exp10(17),
            paymaster_verification_gas_limit: U256::from(100_000u64),
            paymaster_post_op_gas_limit: U256::from(50_000u64),
        }
    }
}

/// A validated endorsement request, resolved against its entry point.
#[derive(Debug, Clone)]
pub struct EndorsementRequest {
    pub operation: VersionedOperation,
    pub entry_point: Address,
    pub chain_id: u64,
}

/// Decoded form of a sponsored paymaster payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endorsement {
    pub signer: Address,
    pub window: ValidityWindow,
    pub signature: Bytes,
}

fn unix_now() -> Result<u64, EndorsementError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| EndorsementError::Internal(e.to_string()))
}

fn uint48_bytes(value: u64) -> [u8; 6] {
    let be = value.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&be[2..]);
    out
}

fn read_uint48(bytes: &[u8]) -> u64 {
    let mut be = [0u8; 8];
    be[2..].copy_from_slice(bytes);
    u64::from_be_bytes(be)
}

fn endorsement_prefix(signer: Address, window: ValidityWindow) -> Vec<u8> {
    let mut data = Vec::with_capacity(ENDORSEMENT_PREFIX_LEN + SIGNATURE_LEN);
    data.push(MODE_SPONSORED);
    data.extend_from_slice(signer.as_bytes());
    data.extend_from_slice(&uint48_bytes(window.valid_until));
    data.extend_from_slice(&uint48_bytes(window.valid_after));
    data
}

/// `mode || signer || validUntil(6) || validAfter(6) || signature`
pub fn encode_paymaster_data(signer: Address, window: ValidityWindow, signature: &[u8]) -> Bytes {
    let mut data = endorsement_prefix(signer, window);
    data.extend_from_slice(signature);
    Bytes::from(data)
}

/// Parses a sponsored payload. Returns `None` for self-paid markers and for
/// anything too short to carry a signature.
pub fn decode_paymaster_data(data: &[u8]) -> Option<Endorsement> {
    if data.len() < ENDORSEMENT_PREFIX_LEN + SIGNATURE_LEN || data[0] != MODE_SPONSORED {
        return None;
    }
    Some(Endorsement {
        signer: Address::from_slice(&data[1..21]),
        window: ValidityWindow {
            valid_until: read_uint48(&data[21..27]),
            valid_after: read_uint48(&data[27..33]),
        },
        signature: Bytes::from(data[ENDORSEMENT_PREFIX_LEN..].to_vec()),
    })
}

/// Accepts a chain id as a hex quantity or a JSON number.
pub fn parse_chain_id(value: &Value) -> Result<u64, EndorsementError> {
    match value {
        Value::String(s) => {
            let parsed = match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse::<u64>(),
            };
            parsed.map_err(|_| EndorsementError::InvalidParams(format!("invalid chain id {s}")))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| EndorsementError::InvalidParams(format!("invalid chain id {n}"))),
        other => Err(EndorsementError::InvalidParams(format!("invalid chain id {other}"))),
    }
}

pub struct Paymaster {
    wallet: Mutex<LocalWallet>,
    pub signer_address: Address,
    registry: Arc<dyn PaymasterRegistry>,
    chain: Arc<dyn ChainReader>,
    hasher: Arc<dyn EndorsementHasher>,
    config: ServiceConfig,
}

impl Paymaster {
    pub fn new(
        wallet: LocalWallet,
        registry: Arc<dyn PaymasterRegistry>,
        chain: Arc<dyn ChainReader>,
        hasher: Arc<dyn EndorsementHasher>,
        config: ServiceConfig,
    ) -> Self {
        let wallet = wallet.with_chain_id(config.chain_id);
        let signer_address = wallet.address();

        info!("Initialized sponsor signer with address: {}", signer_address);

        Self {
            wallet: Mutex::new(wallet),
            signer_address,
            registry,
            chain,
            hasher,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Checks the required inputs and resolves the operation's shape from
    /// the entry point address.
    pub fn parse_request(
        &self,
        operation: Option<Value>,
        entry_point: Option<Address>,
        chain_id: Option<Value>,
    ) -> Result<EndorsementRequest, EndorsementError> {
        let operation = operation
            .filter(|v| !v.is_null())
            .ok_or_else(|| EndorsementError::InvalidParams("missing user operation".to_string()))?;
        let entry_point = entry_point
            .ok_or_else(|| EndorsementError::InvalidParams("missing entry point".to_string()))?;
        let chain_id = chain_id
            .ok_or_else(|| EndorsementError::InvalidParams("missing chain id".to_string()))
            .and_then(|v| parse_chain_id(&v))?;

        if !operation.is_object() {
            return Err(EndorsementError::InvalidRequest(
                "user operation must be an object".to_string(),
            ));
        }
        if chain_id != self.config.chain_id {
            return Err(EndorsementError::InvalidParams(format!(
                "unsupported chain id {chain_id}, expected {}",
                self.config.chain_id
            )));
        }

        let version = EntryPointVersion::detect(entry_point).ok_or_else(|| {
            EndorsementError::InvalidParams(format!("unsupported entry point {entry_point:?}"))
        })?;
        let foreign_fields = match version {
            EntryPointVersion::V0_6 => V07_ONLY_FIELDS,
            EntryPointVersion::V0_7 => V06_ONLY_FIELDS,
        };
        if let Some(field) = foreign_fields.iter().find(|f| operation.get(**f).is_some()) {
            return Err(EndorsementError::ProtocolMismatch(format!(
                "{field} is not a field of {version} operations"
            )));
        }

        let invalid = |e: serde_json::Error| EndorsementError::InvalidParams(e.to_string());
        let operation = match version {
            EntryPointVersion::V0_6 => VersionedOperation::V0_6(
                serde_json::from_value::<UserOperationV06>(operation).map_err(invalid)?,
            ),
            EntryPointVersion::V0_7 => VersionedOperation::V0_7(
                serde_json::from_value::<UserOperation>(operation).map_err(invalid)?,
            ),
        };

        Ok(EndorsementRequest {
            operation,
            entry_point,
            chain_id,
        })
    }

    /// Placeholder endorsement for gas estimation: real paymaster and gas
    /// limits, zeroed signature, never final.
    pub async fn stub_data(
        &self,
        request: &EndorsementRequest,
    ) -> Result<PaymasterResponse, EndorsementError> {
        self.validate_user_operation(&request.operation)?;

        let paymaster = self.resolve_paymaster().await?;
        let window = ValidityWindow::from_now(unix_now()?, self.config.valid_duration);
        let data = encode_paymaster_data(self.signer_address, window, &[0u8; SIGNATURE_LEN]);

        debug!(
            "Stub endorsement for {} via {} ({})",
            request.operation.sender(),
            paymaster,
            request.operation.version()
        );

        Ok(self.response(&request.operation, paymaster, data, false))
    }

    /// Signed endorsement over the fully estimated operation.
    pub async fn final_data(
        &self,
        request: &EndorsementRequest,
    ) -> Result<PaymasterResponse, EndorsementError> {
        // 1. Validate the user operation
        self.validate_user_operation(&request.operation)?;

        // 2. Cost the operation against the sponsor policy
        let max_cost = self.calculate_max_cost(&request.operation)?;
        if max_cost > self.config.max_cost_per_operation {
            return Err(EndorsementError::PolicyLimitExceeded(format!(
                "operation may cost {} wei, policy allows {}",
                max_cost, self.config.max_cost_per_operation
            )));
        }

        // 3. Check the paymaster deposit covers it
        let paymaster = self.resolve_paymaster().await?;
        self.check_paymaster_balance(request.entry_point, paymaster, max_cost)
            .await?;

        // 4. Fresh validity window
        let window = ValidityWindow::from_now(unix_now()?, self.config.valid_duration);

        // 5. Hash with the verifier, over the operation as it will be submitted
        let prefix = Bytes::from(endorsement_prefix(self.signer_address, window));
        let provisional = self.attach(&request.operation, paymaster, prefix);
        let hash = self
            .hasher
            .endorsement_hash(paymaster, &provisional, window)
            .await?;

        // 6. Sign and assemble
        let signature = self.sign_paymaster_hash(hash).await?;
        let data = encode_paymaster_data(self.signer_address, window, &signature);

        info!(
            "Endorsed operation from {} until {}",
            request.operation.sender(),
            window.valid_until
        );

        Ok(self.response(&request.operation, paymaster, data, true))
    }

    fn validate_user_operation(&self, op: &VersionedOperation) -> Result<(), EndorsementError> {
        if op.sender().is_zero() {
            return Err(EndorsementError::InvalidParams("sender is required".to_string()));
        }
        if op.max_fee_per_gas().is_zero() {
            return Err(EndorsementError::InvalidParams(
                "Gas price cannot be zero".to_string(),
            ));
        }
        if op.max_priority_fee_per_gas() > op.max_fee_per_gas() {
            return Err(EndorsementError::InvalidParams(
                "priority fee exceeds max fee".to_string(),
            ));
        }
        Ok(())
    }

    fn paymaster_gas_limits(&self, op: &UserOperation) -> (U256, U256) {
        let verification = if op.paymaster_verification_gas_limit.is_zero() {
            self.config.paymaster_verification_gas_limit
        } else {
            op.paymaster_verification_gas_limit
        };
        let post_op = if op.paymaster_post_op_gas_limit.is_zero() {
            self.config.paymaster_post_op_gas_limit
        } else {
            op.paymaster_post_op_gas_limit
        };
        (verification, post_op)
    }

    // Total gas across every limit times the buffered max fee
    fn calculate_max_cost(&self, op: &VersionedOperation) -> Result<U256, EndorsementError> {
        let overflow = || EndorsementError::InvalidParams("Gas limit overflow".to_string());

        let limits = match op {
            VersionedOperation::V0_6(op) => vec![
                op.call_gas_limit,
                op.verification_gas_limit,
                op.pre_verification_gas,
            ],
            VersionedOperation::V0_7(op) => {
                let (verification, post_op) = self.paymaster_gas_limits(op);
                vec![
                    op.call_gas_limit,
                    op.verification_gas_limit,
                    op.pre_verification_gas,
                    verification,
                    post_op,
                ]
            }
        };
        let total_gas = limits
            .into_iter()
            .try_fold(U256::zero(), |sum, limit| sum.checked_add(limit))
            .ok_or_else(overflow)?;

        let buffered_gas_price = op
            .max_fee_per_gas()
            .checked_mul(U256::from(100 + self.config.gas_price_buffer))
            .and_then(|product| product.checked_div(U256::from(100)))
            .ok_or_else(overflow)?;

        total_gas.checked_mul(buffered_gas_price).ok_or_else(overflow)
    }

    async fn resolve_paymaster(&self) -> Result<Address, EndorsementError> {
        self.registry
            .resolve_paymaster()
            .await
            .map_err(|e| EndorsementError::RegistryUnavailable(e.to_string()))
    }

    async fn check_paymaster_balance(
        &self,
        entry_point: Address,
        paymaster: Address,
        max_cost: U256,
    ) -> Result<(), EndorsementError> {
        let deposit = self.chain.deposit_of(entry_point, paymaster).await?;

        if deposit <= max_cost {
            return Err(EndorsementError::InsufficientSponsorBalance(format!(
                "deposit {} does not cover {}",
                deposit, max_cost
            )));
        }

        Ok(())
    }

    async fn sign_paymaster_hash(&self, hash: H256) -> Result<Vec<u8>, EndorsementError> {
        let wallet = self.wallet.lock().await;
        let signature = wallet.sign_message(hash.as_bytes()).await.map_err(|e| {
            error!("Sponsor key failed to sign {:?}: {}", hash, e);
            EndorsementError::Signing(e.to_string())
        })?;
        let signature = signature.to_vec();
        debug!("Signed endorsement hash {:?}: 0x{}", hash, hex::encode(&signature));
        Ok(signature)
    }

    /// The operation as the entry point will see it once `data` is attached.
    fn attach(
        &self,
        op: &VersionedOperation,
        paymaster: Address,
        data: Bytes,
    ) -> VersionedOperation {
        match op {
            VersionedOperation::V0_7(op) => {
                let (verification, post_op) = self.paymaster_gas_limits(op);
                VersionedOperation::V0_7(UserOperation {
                    paymaster: Some(paymaster),
                    paymaster_verification_gas_limit: verification,
                    paymaster_post_op_gas_limit: post_op,
                    paymaster_data: data,
                    signature: Bytes::default(),
                    ..op.clone()
                })
            }
            VersionedOperation::V0_6(op) => {
                let mut blob = paymaster.as_bytes().to_vec();
                blob.extend_from_slice(&data);
                VersionedOperation::V0_6(UserOperationV06 {
                    paymaster_and_data: Bytes::from(blob),
                    signature: Bytes::default(),
                    ..op.clone()
                })
            }
        }
    }

    fn response(
        &self,
        op: &VersionedOperation,
        paymaster: Address,
        data: Bytes,
        is_final: bool,
    ) -> PaymasterResponse {
        let envelope = match self.attach(op, paymaster, data) {
            VersionedOperation::V0_7(op) => SponsorshipEnvelope::V0_7 {
                paymaster,
                paymaster_data: op.paymaster_data,
                paymaster_verification_gas_limit: op.paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit: op.paymaster_post_op_gas_limit,
            },
            VersionedOperation::V0_6(op) => SponsorshipEnvelope::V0_6 {
                paymaster_and_data: op.paymaster_and_data,
                pre_verification_gas: op.pre_verification_gas,
                verification_gas_limit: op
                    .verification_gas_limit
                    .max(self.config.paymaster_verification_gas_limit),
                call_gas_limit: op.call_gas_limit,
            },
        };

        PaymasterResponse {
            envelope,
            sponsor: Some(SponsorInfo {
                name: self.config.sponsor_name.clone(),
            }),
            is_final,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ChainError;
    use crate::types::{ENTRY_POINT_V06, ENTRY_POINT_V07};
    use async_trait::async_trait;
    use serde_json::json;

    pub(crate) const SPONSOR_KEY: &str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    pub(crate) struct FixedChain {
        pub paymaster: Address,
        pub deposit: U256,
    }

    #[async_trait]
    impl PaymasterRegistry for FixedChain {
        async fn resolve_paymaster(&self) -> Result<Address, ChainError> {
            Ok(self.paymaster)
        }
    }

    #[async_trait]
    impl ChainReader for FixedChain {
        async fn account_nonce(&self, _: Address, _: Address) -> Result<U256, ChainError> {
            Ok(U256::zero())
        }
        async fn deposit_of(&self, _: Address, _: Address) -> Result<U256, ChainError> {
            Ok(self.deposit)
        }
        async fn bond_of(&self, _: Address, _: Address) -> Result<U256, ChainError> {
            Ok(U256::zero())
        }
    }

    #[async_trait]
    impl EndorsementHasher for FixedChain {
        async fn endorsement_hash(
            &self,
            paymaster: Address,
            op: &VersionedOperation,
            window: ValidityWindow,
        ) -> Result<H256, ChainError> {
            let mut seed = paymaster.as_bytes().to_vec();
            seed.extend_from_slice(op.sender().as_bytes());
            seed.extend_from_slice(&window.valid_until.to_be_bytes());
            Ok(H256(ethers::utils::keccak256(seed)))
        }
    }

    pub(crate) fn service(deposit: U256) -> Paymaster {
        let chain = Arc::new(FixedChain {
            paymaster: Address::repeat_byte(0x77),
            deposit,
        });
        Paymaster::new(
            SPONSOR_KEY.parse().unwrap(),
            chain.clone(),
            chain.clone(),
            chain,
            ServiceConfig::default(),
        )
    }

    pub(crate) fn operation_json() -> Value {
        json!({
            "sender": format!("0x{}", "12".repeat(20)),
            "nonce": "0x1",
            "callData": "0xb61d27f6",
            "callGasLimit": "0x5208",
            "verificationGasLimit": "0x186a0",
            "preVerificationGas": "0xc350",
            "maxFeePerGas": "0x3b9aca00",
            "maxPriorityFeePerGas": "0x3b9aca00",
            "signature": "0x"
        })
    }

    pub(crate) fn legacy_operation_json() -> Value {
        let mut op = operation_json();
        op["initCode"] = json!("0x");
        op["paymasterAndData"] = json!("0x");
        op
    }

    fn request(paymaster: &Paymaster, entry_point: Address) -> EndorsementRequest {
        let op = if entry_point == ENTRY_POINT_V06 {
            legacy_operation_json()
        } else {
            operation_json()
        };
        paymaster
            .parse_request(Some(op), Some(entry_point), Some(json!("0x1")))
            .unwrap()
    }

    #[test]
    fn payload_layout_round_trips() {
        let window = ValidityWindow { valid_after: 0, valid_until: 1_700_003_600 };
        let data = encode_paymaster_data(Address::repeat_byte(0x05), window, &[0xab; 65]);
        assert_eq!(data.len(), 1 + 20 + 6 + 6 + 65);
        assert_eq!(data[0], MODE_SPONSORED);

        let decoded = decode_paymaster_data(&data).unwrap();
        assert_eq!(decoded.signer, Address::repeat_byte(0x05));
        assert_eq!(decoded.window, window);
        assert_eq!(decoded.signature.len(), 65);

        assert!(decode_paymaster_data(&[MODE_SELF_PAID]).is_none());

        let far = ValidityWindow::from_now(1_700_000_000, u64::MAX);
        let data = encode_paymaster_data(Address::repeat_byte(0x05), far, &[0xab; 65]);
        assert_eq!(decode_paymaster_data(&data).unwrap().window, far);
    }

    #[test]
    fn chain_id_accepts_hex_and_numbers() {
        assert_eq!(parse_chain_id(&json!("0xaa36a7")).unwrap(), 11_155_111);
        assert_eq!(parse_chain_id(&json!(84532)).unwrap(), 84_532);
        assert!(parse_chain_id(&json!("sepolia")).is_err());
    }

    #[test]
    fn rejects_missing_inputs_and_unknown_entry_points() {
        let paymaster = service(U256::exp10(18));
        assert!(matches!(
            paymaster.parse_request(None, Some(ENTRY_POINT_V07), Some(json!("0x1"))),
            Err(EndorsementError::InvalidParams(_))
        ));
        assert!(matches!(
            paymaster.parse_request(Some(operation_json()), None, Some(json!("0x1"))),
            Err(EndorsementError::InvalidParams(_))
        ));
        assert!(matches!(
            paymaster.parse_request(Some(operation_json()), Some(ENTRY_POINT_V07), None),
            Err(EndorsementError::InvalidParams(_))
        ));
        assert!(matches!(
            paymaster.parse_request(
                Some(operation_json()),
                Some(Address::repeat_byte(0x01)),
                Some(json!("0x1"))
            ),
            Err(EndorsementError::InvalidParams(_))
        ));
        assert!(matches!(
            paymaster.parse_request(
                Some(operation_json()),
                Some(ENTRY_POINT_V07),
                Some(json!("0x2"))
            ),
            Err(EndorsementError::InvalidParams(_))
        ));
    }

    #[test]
    fn operations_shaped_for_the_other_entry_point_are_rejected() {
        let paymaster = service(U256::exp10(18));

        let mut legacy = legacy_operation_json();
        legacy["initCode"] = json!(format!("0x{}deadbeef", "ab".repeat(20)));
        assert!(matches!(
            paymaster.parse_request(Some(legacy), Some(ENTRY_POINT_V07), Some(json!("0x1"))),
            Err(EndorsementError::ProtocolMismatch(_))
        ));

        let mut split = operation_json();
        split["factory"] = json!(format!("0x{}", "ab".repeat(20)));
        split["factoryData"] = json!("0xdeadbeef");
        assert!(matches!(
            paymaster.parse_request(Some(split), Some(ENTRY_POINT_V06), Some(json!("0x1"))),
            Err(EndorsementError::ProtocolMismatch(_))
        ));

        let mut sponsored = operation_json();
        sponsored["paymaster"] = json!(format!("0x{}", "77".repeat(20)));
        assert!(matches!(
            paymaster.parse_request(Some(sponsored), Some(ENTRY_POINT_V06), Some(json!("0x1"))),
            Err(EndorsementError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn deployment_code_survives_parsing() {
        let paymaster = service(U256::exp10(18));
        let mut op = operation_json();
        op["factory"] = json!(format!("0x{}", "ab".repeat(20)));
        op["factoryData"] = json!("0xdeadbeef");
        let request = paymaster
            .parse_request(Some(op), Some(ENTRY_POINT_V07), Some(json!("0x1")))
            .unwrap();
        let VersionedOperation::V0_7(op) = request.operation else {
            panic!("expected v0.7 operation");
        };
        assert_eq!(op.factory, Some(Address::repeat_byte(0xab)));
        assert_eq!(op.factory_data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));

        let mut legacy = legacy_operation_json();
        legacy["initCode"] = json!(format!("0x{}deadbeef", "ab".repeat(20)));
        let request = paymaster
            .parse_request(Some(legacy), Some(ENTRY_POINT_V06), Some(json!("0x1")))
            .unwrap();
        let VersionedOperation::V0_6(op) = request.operation else {
            panic!("expected v0.6 operation");
        };
        assert_eq!(op.init_code.len(), 24);
    }

    #[tokio::test]
    async fn stub_is_never_final_and_carries_zero_signature() {
        let paymaster = service(U256::exp10(18));
        let response = paymaster.stub_data(&request(&paymaster, ENTRY_POINT_V07)).await.unwrap();
        assert!(!response.is_final);

        match response.envelope {
            SponsorshipEnvelope::V0_7 {
                paymaster: address,
                paymaster_data,
                paymaster_verification_gas_limit,
                ..
            } => {
                assert_eq!(address, Address::repeat_byte(0x77));
                let decoded = decode_paymaster_data(&paymaster_data).unwrap();
                assert!(decoded.signature.iter().all(|b| *b == 0));
                assert_eq!(paymaster_verification_gas_limit, U256::from(100_000u64));
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[tokio::test]
    async fn final_window_is_bounded_and_signed() {
        let paymaster = service(U256::exp10(18));
        let before = unix_now().unwrap();
        let response = paymaster.final_data(&request(&paymaster, ENTRY_POINT_V07)).await.unwrap();
        assert!(response.is_final);

        let SponsorshipEnvelope::V0_7 { paymaster_data, .. } = response.envelope else {
            panic!("expected split shape");
        };
        let decoded = decode_paymaster_data(&paymaster_data).unwrap();
        assert!(decoded.window.is_well_formed());
        assert!(decoded.window.valid_until > before);
        assert!(decoded.window.valid_until <= before + 2 * 3600);
        assert_eq!(decoded.signer, paymaster.signer_address);
        assert!(decoded.signature.iter().any(|b| *b != 0));
    }

    #[tokio::test]
    async fn v06_gets_combined_blob() {
        let paymaster = service(U256::exp10(18));
        let v06 = paymaster.final_data(&request(&paymaster, ENTRY_POINT_V06)).await.unwrap();
        let v07 = paymaster.final_data(&request(&paymaster, ENTRY_POINT_V07)).await.unwrap();

        match v06.envelope {
            SponsorshipEnvelope::V0_6 { paymaster_and_data, call_gas_limit, .. } => {
                assert_eq!(&paymaster_and_data[..20], Address::repeat_byte(0x77).as_bytes());
                assert_eq!(call_gas_limit, U256::from(0x5208u64));
            }
            other => panic!("unexpected envelope {other:?}"),
        }
        assert!(matches!(v07.envelope, SponsorshipEnvelope::V0_7 { .. }));
    }

    #[tokio::test]
    async fn low_deposit_is_insufficient_balance() {
        let paymaster = service(U256::from(1u64));
        let err = paymaster
            .final_data(&request(&paymaster, ENTRY_POINT_V07))
            .await
            .unwrap_err();
        assert!(matches!(err, EndorsementError::InsufficientSponsorBalance(_)));
    }

    #[tokio::test]
    async fn expensive_operation_exceeds_policy() {
        let paymaster = service(U256::MAX);
        let mut op = operation_json();
        op["maxFeePerGas"] = json!("0xe8d4a51000");
        op["maxPriorityFeePerGas"] = json!("0x1");
        let request = paymaster
            .parse_request(Some(op), Some(ENTRY_POINT_V07), Some(json!(1)))
            .unwrap();
        let err = paymaster.final_data(&request).await.unwrap_err();
        assert!(matches!(err, EndorsementError::PolicyLimitExceeded(_)));
    }
}
