// src/contracts.rs
//! Bindings for the on-chain collaborators. Only the functions the protocol
//! reads or calls are declared.

use ethers::types::Bytes;

use crate::types::{PackedUserOperation, UserOperationV06};

pub mod entry_point {
    use ethers::prelude::abigen;

    abigen!(
        EntryPoint,
        r#"[
            function getNonce(address sender, uint192 key) external view returns (uint256)
            function balanceOf(address account) external view returns (uint256)
        ]"#
    );
}

pub mod account {
    use ethers::prelude::abigen;

    abigen!(
        SimpleAccount,
        r#"[
            function execute(address dest, uint256 value, bytes func) external
        ]"#
    );
}

pub mod registry {
    use ethers::prelude::abigen;

    abigen!(
        SponsorRegistry,
        r#"[
            function activePaymaster() external view returns (address)
        ]"#
    );
}

pub mod paymaster {
    use ethers::prelude::abigen;

    abigen!(
        SponsorPaymaster,
        r#"[
            struct PackedUserOperation { address sender; uint256 nonce; bytes initCode; bytes callData; bytes32 accountGasLimits; uint256 preVerificationGas; bytes32 gasFees; bytes paymasterAndData; bytes signature; }
            function getHash(PackedUserOperation userOp, uint48 validUntil, uint48 validAfter) external view returns (bytes32)
            function bondOf(address account) external view returns (uint256)
            function bond(address account) external payable
        ]"#
    );
}

pub mod legacy_paymaster {
    use ethers::prelude::abigen;

    abigen!(
        LegacySponsorPaymaster,
        r#"[
            struct UserOperation { address sender; uint256 nonce; bytes initCode; bytes callData; uint256 callGasLimit; uint256 verificationGasLimit; uint256 preVerificationGas; uint256 maxFeePerGas; uint256 maxPriorityFeePerGas; bytes paymasterAndData; bytes signature; }
            function getHash(UserOperation userOp, uint48 validUntil, uint48 validAfter) external view returns (bytes32)
        ]"#
    );
}

impl From<&PackedUserOperation> for paymaster::PackedUserOperation {
    fn from(op: &PackedUserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            account_gas_limits: op.account_gas_limits.0,
            pre_verification_gas: op.pre_verification_gas,
            gas_fees: op.gas_fees.0,
            paymaster_and_data: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        }
    }
}

impl From<&UserOperationV06> for legacy_paymaster::UserOperation {
    fn from(op: &UserOperationV06) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            call_gas_limit: op.call_gas_limit,
            verification_gas_limit: op.verification_gas_limit,
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas: op.max_fee_per_gas,
            max_priority_fee_per_gas: op.max_priority_fee_per_gas,
            paymaster_and_data: op.paymaster_and_data.clone(),
            signature: Bytes::default(),
        }
    }
}
