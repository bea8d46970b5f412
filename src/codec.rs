// src/codec.rs
//! Conversion between the field form of an operation and the fixed layout
//! hashed and executed by the entry point contracts.

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

use crate::error::CodecError;
use crate::types::{PackedUserOperation, UserOperation, UserOperationV06};

const ADDRESS_LEN: usize = 20;
const GAS_LIMIT_LEN: usize = 16;
/// paymaster address + verification gas limit + post-op gas limit
const PAYMASTER_FIXED_LEN: usize = ADDRESS_LEN + 2 * GAS_LIMIT_LEN;

fn ensure_u128(value: U256, field: &'static str) -> Result<u128, CodecError> {
    if value.bits() > 128 {
        return Err(CodecError::FieldOverflow { field });
    }
    Ok(value.as_u128())
}

/// `high << 128 | low` as a big-endian word.
pub fn pack_u128_pair(
    high: U256,
    low: U256,
    high_field: &'static str,
    low_field: &'static str,
) -> Result<H256, CodecError> {
    let high = ensure_u128(high, high_field)?;
    let low = ensure_u128(low, low_field)?;

    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&high.to_be_bytes());
    word[16..].copy_from_slice(&low.to_be_bytes());
    Ok(H256(word))
}

/// Splits a packed word into its `(high, low)` halves.
pub fn unpack_u128_pair(word: H256) -> (U256, U256) {
    let bytes = word.as_bytes();
    (
        U256::from_big_endian(&bytes[..16]),
        U256::from_big_endian(&bytes[16..]),
    )
}

/// Packs a v0.7 operation into its canonical form.
///
/// Fails only when one of the packed gas or fee sub-fields exceeds 128 bits.
pub fn pack(op: &UserOperation) -> Result<PackedUserOperation, CodecError> {
    let init_code = match op.factory {
        Some(factory) => {
            let mut code = factory.as_bytes().to_vec();
            code.extend_from_slice(&op.factory_data);
            Bytes::from(code)
        }
        None => Bytes::default(),
    };

    let account_gas_limits = pack_u128_pair(
        op.verification_gas_limit,
        op.call_gas_limit,
        "verificationGasLimit",
        "callGasLimit",
    )?;
    let gas_fees = pack_u128_pair(
        op.max_priority_fee_per_gas,
        op.max_fee_per_gas,
        "maxPriorityFeePerGas",
        "maxFeePerGas",
    )?;

    let paymaster_and_data = match op.paymaster {
        Some(paymaster) => {
            let verification = ensure_u128(
                op.paymaster_verification_gas_limit,
                "paymasterVerificationGasLimit",
            )?;
            let post_op = ensure_u128(op.paymaster_post_op_gas_limit, "paymasterPostOpGasLimit")?;

            let mut blob = Vec::with_capacity(PAYMASTER_FIXED_LEN + op.paymaster_data.len());
            blob.extend_from_slice(paymaster.as_bytes());
            blob.extend_from_slice(&verification.to_be_bytes());
            blob.extend_from_slice(&post_op.to_be_bytes());
            blob.extend_from_slice(&op.paymaster_data);
            Bytes::from(blob)
        }
        None => Bytes::default(),
    };

    Ok(PackedUserOperation {
        sender: op.sender,
        nonce: op.nonce,
        init_code,
        call_data: op.call_data.clone(),
        account_gas_limits,
        pre_verification_gas: op.pre_verification_gas,
        gas_fees,
        paymaster_and_data,
        signature: op.signature.clone(),
    })
}

/// Inverse of [`pack`]. Never fails: short or malformed sponsorship blobs
/// yield a zero paymaster address and whatever payload could be recovered.
pub fn unpack(packed: &PackedUserOperation) -> UserOperation {
    let (factory, factory_data) = if packed.init_code.len() >= ADDRESS_LEN {
        (
            Some(Address::from_slice(&packed.init_code[..ADDRESS_LEN])),
            Bytes::from(packed.init_code[ADDRESS_LEN..].to_vec()),
        )
    } else {
        (None, Bytes::default())
    };

    let (verification_gas_limit, call_gas_limit) = unpack_u128_pair(packed.account_gas_limits);
    let (max_priority_fee_per_gas, max_fee_per_gas) = unpack_u128_pair(packed.gas_fees);

    let blob = &packed.paymaster_and_data;
    let (paymaster, paymaster_verification_gas_limit, paymaster_post_op_gas_limit, paymaster_data) =
        if blob.is_empty() {
            (None, U256::zero(), U256::zero(), Bytes::default())
        } else if blob.len() < ADDRESS_LEN {
            (Some(Address::zero()), U256::zero(), U256::zero(), Bytes::default())
        } else if blob.len() < PAYMASTER_FIXED_LEN {
            (
                Some(Address::from_slice(&blob[..ADDRESS_LEN])),
                U256::zero(),
                U256::zero(),
                Bytes::from(blob[ADDRESS_LEN..].to_vec()),
            )
        } else {
            let limits_end = ADDRESS_LEN + GAS_LIMIT_LEN;
            (
                Some(Address::from_slice(&blob[..ADDRESS_LEN])),
                U256::from_big_endian(&blob[ADDRESS_LEN..limits_end]),
                U256::from_big_endian(&blob[limits_end..PAYMASTER_FIXED_LEN]),
                Bytes::from(blob[PAYMASTER_FIXED_LEN..].to_vec()),
            )
        };

    UserOperation {
        sender: packed.sender,
        nonce: packed.nonce,
        factory,
        factory_data,
        call_data: packed.call_data.clone(),
        call_gas_limit,
        verification_gas_limit,
        pre_verification_gas: packed.pre_verification_gas,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        paymaster,
        paymaster_verification_gas_limit,
        paymaster_post_op_gas_limit,
        paymaster_data,
        signature: packed.signature.clone(),
    }
}

fn word(hash: [u8; 32]) -> Token {
    Token::FixedBytes(hash.to_vec())
}

fn finish_hash(inner: [u8; 32], entry_point: Address, chain_id: u64) -> H256 {
    let outer = encode(&[
        word(inner),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);
    H256(keccak256(outer))
}

/// EntryPoint v0.7 `getUserOpHash`.
pub fn hash(packed: &PackedUserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let inner = encode(&[
        Token::Address(packed.sender),
        Token::Uint(packed.nonce),
        word(keccak256(&packed.init_code)),
        word(keccak256(&packed.call_data)),
        word(packed.account_gas_limits.0),
        Token::Uint(packed.pre_verification_gas),
        word(packed.gas_fees.0),
        word(keccak256(&packed.paymaster_and_data)),
    ]);
    finish_hash(keccak256(inner), entry_point, chain_id)
}

/// Packs then hashes a v0.7 operation.
pub fn user_operation_hash(
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> Result<H256, CodecError> {
    Ok(hash(&pack(op)?, entry_point, chain_id))
}

/// EntryPoint v0.6 `getUserOpHash`; gas fields are hashed as separate words.
pub fn hash_v06(op: &UserOperationV06, entry_point: Address, chain_id: u64) -> H256 {
    let inner = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        word(keccak256(&op.init_code)),
        word(keccak256(&op.call_data)),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        word(keccak256(&op.paymaster_and_data)),
    ]);
    finish_hash(keccak256(inner), entry_point, chain_id)
}

/// Splits a v0.6 `paymasterAndData` blob into address and payload.
pub fn split_paymaster_and_data(blob: &[u8]) -> (Address, Bytes) {
    if blob.len() < ADDRESS_LEN {
        return (Address::zero(), Bytes::default());
    }
    (
        Address::from_slice(&blob[..ADDRESS_LEN]),
        Bytes::from(blob[ADDRESS_LEN..].to_vec()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ENTRY_POINT_V07;

    fn sample() -> UserOperation {
        UserOperation {
            sender: "0x1306b01bc3e4ad202612d3843387e94737673f53".parse().unwrap(),
            nonce: U256::from(8942u64),
            factory: Some(Address::repeat_byte(0x69)),
            factory_data: Bytes::from(vec![0xde, 0xad]),
            call_data: Bytes::from(vec![0x00, 0x08, 0x00, 0x85]),
            call_gas_limit: U256::from(10_000u64),
            verification_gas_limit: U256::from(100_000u64),
            pre_verification_gas: U256::from(100u64),
            max_fee_per_gas: U256::from(99_999u64),
            max_priority_fee_per_gas: U256::from(9_999_999u64),
            paymaster: Some(Address::repeat_byte(0x42)),
            paymaster_verification_gas_limit: U256::from(60_000u64),
            paymaster_post_op_gas_limit: U256::from(1u64),
            paymaster_data: Bytes::from(vec![0x00]),
            signature: Bytes::from(vec![0xaa; 65]),
        }
    }

    #[test]
    fn pack_places_high_half_first() {
        let packed = pack(&sample()).unwrap();
        let (high, low) = unpack_u128_pair(packed.account_gas_limits);
        assert_eq!(high, U256::from(100_000u64));
        assert_eq!(low, U256::from(10_000u64));
        let mut expected = [0u8; 32];
        expected[13..16].copy_from_slice(&[0x01, 0x86, 0xa0]);
        expected[30..].copy_from_slice(&[0x27, 0x10]);
        assert_eq!(packed.account_gas_limits, H256(expected));
        assert_eq!(packed.init_code.len(), 22);
        assert_eq!(packed.paymaster_and_data.len(), PAYMASTER_FIXED_LEN + 1);
    }

    #[test]
    fn round_trip_is_lossless() {
        let op = sample();
        assert_eq!(unpack(&pack(&op).unwrap()), op);

        let bare = UserOperation {
            sender: Address::repeat_byte(0x01),
            call_gas_limit: U256::from(u128::MAX),
            max_fee_per_gas: U256::from(u128::MAX),
            ..Default::default()
        };
        assert_eq!(unpack(&pack(&bare).unwrap()), bare);
    }

    #[test]
    fn pack_rejects_oversized_sub_fields() {
        let mut op = sample();
        op.max_fee_per_gas = U256::from(u128::MAX) + U256::one();
        assert_eq!(
            pack(&op),
            Err(CodecError::FieldOverflow { field: "maxFeePerGas" })
        );

        let mut op = sample();
        op.paymaster_post_op_gas_limit = U256::MAX;
        assert!(pack(&op).is_err());
    }

    #[test]
    fn unpack_tolerates_short_sponsorship_blobs() {
        let mut packed = pack(&sample()).unwrap();
        packed.paymaster_and_data = Bytes::from(vec![0x42; 7]);
        let op = unpack(&packed);
        assert_eq!(op.paymaster, Some(Address::zero()));
        assert!(op.paymaster_data.is_empty());

        packed.paymaster_and_data = Bytes::from(vec![0x42; 25]);
        let op = unpack(&packed);
        assert_eq!(op.paymaster, Some(Address::repeat_byte(0x42)));
        assert_eq!(op.paymaster_data.len(), 5);
        assert!(op.paymaster_verification_gas_limit.is_zero());
    }

    #[test]
    fn hash_is_deterministic_and_sensitive() {
        let op = sample();
        let base = user_operation_hash(&op, ENTRY_POINT_V07, 1).unwrap();
        assert_eq!(base, user_operation_hash(&op, ENTRY_POINT_V07, 1).unwrap());

        assert_ne!(base, user_operation_hash(&op, ENTRY_POINT_V07, 2).unwrap());
        assert_ne!(base, user_operation_hash(&op, Address::repeat_byte(0x01), 1).unwrap());

        let variants: Vec<Box<dyn Fn(&mut UserOperation)>> = vec![
            Box::new(|o| o.sender = Address::repeat_byte(0x99)),
            Box::new(|o| o.nonce += U256::one()),
            Box::new(|o| o.factory_data = Bytes::from(vec![0x01])),
            Box::new(|o| o.call_data = Bytes::from(vec![0x01])),
            Box::new(|o| o.call_gas_limit += U256::one()),
            Box::new(|o| o.verification_gas_limit += U256::one()),
            Box::new(|o| o.pre_verification_gas += U256::one()),
            Box::new(|o| o.max_fee_per_gas += U256::one()),
            Box::new(|o| o.max_priority_fee_per_gas += U256::one()),
            Box::new(|o| o.paymaster_data = Bytes::from(vec![0x01])),
            Box::new(|o| o.paymaster_post_op_gas_limit += U256::one()),
        ];
        for mutate in variants {
            let mut changed = op.clone();
            mutate(&mut changed);
            assert_ne!(base, user_operation_hash(&changed, ENTRY_POINT_V07, 1).unwrap());
        }
    }

    #[test]
    fn hash_ignores_signature() {
        let op = sample();
        let mut resigned = op.clone();
        resigned.signature = Bytes::from(vec![0x01; 65]);
        assert_eq!(
            user_operation_hash(&op, ENTRY_POINT_V07, 1).unwrap(),
            user_operation_hash(&resigned, ENTRY_POINT_V07, 1).unwrap()
        );
    }

    #[test]
    fn v06_hash_matches_entry_point_vectors() {
        let entry_point: Address = "0x66a15edcc3b50a663e72f1457ffd49b9ae284ddc".parse().unwrap();

        let zeroed = UserOperationV06::default();
        let expected: H256 = "0xdca97c3b49558ab360659f6ead939773be8bf26631e61bb17045bb70dc983b2d"
            .parse()
            .unwrap();
        assert_eq!(hash_v06(&zeroed, entry_point, 1337), expected);

        let op = UserOperationV06 {
            sender: "0x1306b01bc3e4ad202612d3843387e94737673f53".parse().unwrap(),
            nonce: U256::from(8942u64),
            init_code: "0x6942069420694206942069420694206942069420".parse().unwrap(),
            call_data: "0x0000000000000000000000000000000000000000080085".parse().unwrap(),
            call_gas_limit: U256::from(10_000u64),
            verification_gas_limit: U256::from(100_000u64),
            pre_verification_gas: U256::from(100u64),
            max_fee_per_gas: U256::from(99_999u64),
            max_priority_fee_per_gas: U256::from(9_999_999u64),
            paymaster_and_data: "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
                .parse()
                .unwrap(),
            signature: "0xda0929f527cded8d0a1eaf2e8861d7f7e2d8160b7b13942f99dd367df4473a"
                .parse()
                .unwrap(),
        };
        let expected: H256 = "0x484add9e4d8c3172d11b5feb6a3cc712280e176d278027cfa02ee396eb28afa1"
            .parse()
            .unwrap();
        assert_eq!(hash_v06(&op, entry_point, 1337), expected);
    }

    #[test]
    fn v07_hash_matches_entry_point_vector() {
        let call_data: Bytes = concat!(
            "0x",
            "e9ae5c53000000000000000000000000000000000000000000000000000000000000000000000000",
            "00000000000000000000000000000000000000000000000000000040000000000000000000000000",
            "00000000000000000000000000000000000001d8b292cf4a8e1ff21ac27c4f94071cd02c022c414b",
            "00000000000000000000000000000000000000000000000000000000000000009517e29f00000000",
            "00000000000000000000000000000000000000000000000000000002000000000000000000000000",
            "ad6330089d9a1fe89f4020292e1afe9969a5a2fc0000000000000000000000000000000000000000",
            "00000000000000000000006000000000000000000000000000000000000000000000000000000000",
            "00000120000000000000000000000000000000000000000000000000000000000001518000000000",
            "00000000000000000000000000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000018e2fbe89800000000000000000000000000000000000000000",
            "00000000000000000000008000000000000000000000000000000000000000000000000000000000",
            "000000800000000000000000000000002372912728f93ab3daaaebea4f87e6e28476d98700000000",
            "0000000000000000000000000000000000000000002386f26fc10000000000000000000000000000",
            "00000000000000000000000000000000000000600000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000",
        )
        .parse()
        .unwrap();
        let packed = PackedUserOperation {
            sender: "0xb292Cf4a8E1fF21Ac27C4f94071Cd02C022C414b".parse().unwrap(),
            nonce: U256::from_str_radix(
                "F83D07238A7C8814A48535035602123AD6DBFA63000000000000000000000001",
                16,
            )
            .unwrap(),
            init_code: Bytes::default(),
            call_data,
            account_gas_limits: "0x000000000000000000000000000114fc0000000000000000000000000012c9b5"
                .parse()
                .unwrap(),
            pre_verification_gas: U256::from(48_916u64),
            gas_fees: "0x000000000000000000000000524121000000000000000000000000109a4a441a"
                .parse()
                .unwrap(),
            paymaster_and_data: Bytes::default(),
            signature: "0x3c7bfe22c9c2ef8994a9637bcc4df1741c5dc0c25b209545a7aeb20f7770f351479b683bd17c4d55bc32e2a649c8d2dff49dcfcc1f3fd837bcd88d1e69a434cf1c"
                .parse()
                .unwrap(),
        };

        let expected: H256 = "0xe486401370d145766c3cf7ba089553214a1230d38662ae532c9b62eb6dadcf7e"
            .parse()
            .unwrap();
        assert_eq!(hash(&packed, ENTRY_POINT_V07, 11_155_111), expected);

        // the field form packs back to the same words
        let op = unpack(&packed);
        assert_eq!(user_operation_hash(&op, ENTRY_POINT_V07, 11_155_111).unwrap(), expected);
    }

    #[test]
    fn splits_legacy_blob() {
        let (paymaster, data) = split_paymaster_and_data(&[0x11; 23]);
        assert_eq!(paymaster, Address::repeat_byte(0x11));
        assert_eq!(data.len(), 3);
        assert_eq!(split_paymaster_and_data(&[0x11; 3]), (Address::zero(), Bytes::default()));
    }
}
