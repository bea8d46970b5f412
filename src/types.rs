// src/types.rs
use ethers::types::{Address, Bytes, H160, H256, U256};
use serde::{Deserialize, Serialize};

/// EntryPoint v0.6: one concatenated `paymasterAndData` blob.
pub const ENTRY_POINT_V06: Address = H160([
    0x5f, 0xf1, 0x37, 0xd4, 0xb0, 0xfd, 0xcd, 0x49, 0xdc, 0xa3, 0x0c, 0x7c, 0xf5, 0x7e, 0x57, 0x8a,
    0x02, 0x6d, 0x27, 0x89,
]);

/// EntryPoint v0.7: paymaster address and data as separate fields.
pub const ENTRY_POINT_V07: Address = H160([
    0x00, 0x00, 0x00, 0x00, 0x71, 0x72, 0x7d, 0xe2, 0x2e, 0x5e, 0x9d, 0x8b, 0xaf, 0x0e, 0xda, 0xc6,
    0xf3, 0x7d, 0xa0, 0x32,
]);

/// Placeholder owner signature used while the relay estimates gas. It has the
/// shape of a 65-byte ECDSA signature so account validation code runs its
/// normal path.
pub const DUMMY_SIGNATURE: [u8; 65] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x7a, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
    0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
    0x1c,
];

fn is_empty_bytes(bytes: &Bytes) -> bool {
    bytes.is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPointVersion {
    V0_6,
    V0_7,
}

impl EntryPointVersion {
    /// Resolves the wire format from the entry point address. Unknown
    /// addresses have no version.
    pub fn detect(entry_point: Address) -> Option<Self> {
        if entry_point == ENTRY_POINT_V07 {
            Some(Self::V0_7)
        } else if entry_point == ENTRY_POINT_V06 {
            Some(Self::V0_6)
        } else {
            None
        }
    }
}

impl std::fmt::Display for EntryPointVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPointVersion::V0_6 => write!(f, "v0.6"),
            EntryPointVersion::V0_7 => write!(f, "v0.7"),
        }
    }
}

/// User operation in the field-based form used by EntryPoint v0.7 RPCs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "is_empty_bytes")]
    pub factory_data: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "U256::is_zero")]
    pub paymaster_verification_gas_limit: U256,
    #[serde(default, skip_serializing_if = "U256::is_zero")]
    pub paymaster_post_op_gas_limit: U256,
    #[serde(default, skip_serializing_if = "is_empty_bytes")]
    pub paymaster_data: Bytes,
    #[serde(default)]
    pub signature: Bytes,
}

/// User operation as accepted by EntryPoint v0.6.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationV06 {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default)]
    pub paymaster_and_data: Bytes,
    #[serde(default)]
    pub signature: Bytes,
}

/// Canonical fixed-layout form hashed by EntryPoint v0.7.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    /// `verificationGasLimit << 128 | callGasLimit`
    pub account_gas_limits: H256,
    pub pre_verification_gas: U256,
    /// `maxPriorityFeePerGas << 128 | maxFeePerGas`
    pub gas_fees: H256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// An operation as received at the service boundary, resolved once against
/// the targeted entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionedOperation {
    V0_6(UserOperationV06),
    V0_7(UserOperation),
}

impl VersionedOperation {
    pub fn version(&self) -> EntryPointVersion {
        match self {
            VersionedOperation::V0_6(_) => EntryPointVersion::V0_6,
            VersionedOperation::V0_7(_) => EntryPointVersion::V0_7,
        }
    }

    pub fn sender(&self) -> Address {
        match self {
            VersionedOperation::V0_6(op) => op.sender,
            VersionedOperation::V0_7(op) => op.sender,
        }
    }

    pub fn max_fee_per_gas(&self) -> U256 {
        match self {
            VersionedOperation::V0_6(op) => op.max_fee_per_gas,
            VersionedOperation::V0_7(op) => op.max_fee_per_gas,
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> U256 {
        match self {
            VersionedOperation::V0_6(op) => op.max_priority_fee_per_gas,
            VersionedOperation::V0_7(op) => op.max_priority_fee_per_gas,
        }
    }
}

/// Largest timestamp a `uint48` window bound can carry.
pub const UINT48_MAX: u64 = (1 << 48) - 1;

/// `(validAfter, validUntil)` bounds of an endorsement, in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityWindow {
    pub valid_after: u64,
    pub valid_until: u64,
}

impl ValidityWindow {
    /// Window opening immediately (`validAfter = 0`) and closing `duration`
    /// seconds after `now`, capped at [`UINT48_MAX`].
    pub fn from_now(now: u64, duration: u64) -> Self {
        Self {
            valid_after: 0,
            valid_until: now.saturating_add(duration.max(1)).min(UINT48_MAX),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.valid_after < self.valid_until
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        self.valid_after <= timestamp && timestamp <= self.valid_until
    }
}

/// A `(maxFeePerGas, maxPriorityFeePerGas)` suggestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPrice {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Fee suggestions returned by the relay, cheapest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPriceTiers {
    pub slow: GasPrice,
    pub standard: GasPrice,
    pub fast: GasPrice,
}

/// Relay reply to `eth_estimateUserOperationGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub transaction_hash: H256,
}

/// Relay reply to `eth_getUserOperationReceipt` once the operation is mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub actual_gas_cost: U256,
    pub receipt: SettlementReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorInfo {
    pub name: String,
}

/// Sponsorship fields in the shape the targeted entry point expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SponsorshipEnvelope {
    V0_6 {
        paymaster_and_data: Bytes,
        pre_verification_gas: U256,
        verification_gas_limit: U256,
        call_gas_limit: U256,
    },
    V0_7 {
        paymaster: Address,
        paymaster_data: Bytes,
        paymaster_verification_gas_limit: U256,
        paymaster_post_op_gas_limit: U256,
    },
}

impl SponsorshipEnvelope {
    pub fn version(&self) -> EntryPointVersion {
        match self {
            SponsorshipEnvelope::V0_6 { .. } => EntryPointVersion::V0_6,
            SponsorshipEnvelope::V0_7 { .. } => EntryPointVersion::V0_7,
        }
    }
}

/// Reply of `pm_getPaymasterStubData` / `pm_getPaymasterData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WirePaymasterResponse", into = "WirePaymasterResponse")]
pub struct PaymasterResponse {
    pub envelope: SponsorshipEnvelope,
    pub sponsor: Option<SponsorInfo>,
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponseV07 {
    paymaster: Address,
    paymaster_data: Bytes,
    #[serde(default)]
    paymaster_verification_gas_limit: U256,
    #[serde(default)]
    paymaster_post_op_gas_limit: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sponsor: Option<SponsorInfo>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponseV06 {
    paymaster_and_data: Bytes,
    #[serde(default)]
    pre_verification_gas: U256,
    #[serde(default)]
    verification_gas_limit: U256,
    #[serde(default)]
    call_gas_limit: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sponsor: Option<SponsorInfo>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WirePaymasterResponse {
    V07(WireResponseV07),
    V06(WireResponseV06),
}

impl From<WirePaymasterResponse> for PaymasterResponse {
    fn from(wire: WirePaymasterResponse) -> Self {
        match wire {
            WirePaymasterResponse::V07(r) => PaymasterResponse {
                envelope: SponsorshipEnvelope::V0_7 {
                    paymaster: r.paymaster,
                    paymaster_data: r.paymaster_data,
                    paymaster_verification_gas_limit: r.paymaster_verification_gas_limit,
                    paymaster_post_op_gas_limit: r.paymaster_post_op_gas_limit,
                },
                sponsor: r.sponsor,
                is_final: r.is_final,
            },
            WirePaymasterResponse::V06(r) => PaymasterResponse {
                envelope: SponsorshipEnvelope::V0_6 {
                    paymaster_and_data: r.paymaster_and_data,
                    pre_verification_gas: r.pre_verification_gas,
                    verification_gas_limit: r.verification_gas_limit,
                    call_gas_limit: r.call_gas_limit,
                },
                sponsor: r.sponsor,
                is_final: r.is_final,
            },
        }
    }
}

impl From<PaymasterResponse> for WirePaymasterResponse {
    fn from(response: PaymasterResponse) -> Self {
        match response.envelope {
            SponsorshipEnvelope::V0_7 {
                paymaster,
                paymaster_data,
                paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit,
            } => WirePaymasterResponse::V07(WireResponseV07 {
                paymaster,
                paymaster_data,
                paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit,
                sponsor: response.sponsor,
                is_final: response.is_final,
            }),
            SponsorshipEnvelope::V0_6 {
                paymaster_and_data,
                pre_verification_gas,
                verification_gas_limit,
                call_gas_limit,
            } => WirePaymasterResponse::V06(WireResponseV06 {
                paymaster_and_data,
                pre_verification_gas,
                verification_gas_limit,
                call_gas_limit,
                sponsor: response.sponsor,
                is_final: response.is_final,
            }),
        }
    }
}
