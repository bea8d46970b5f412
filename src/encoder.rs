// src/encoder.rs
use ethers::abi::AbiEncode;
use ethers::types::{Address, Bytes, U256};

use crate::contracts::account::ExecuteCall;

/// Produces the smart account call data for a single call.
pub trait CallEncoder: Send + Sync {
    fn encode_call(&self, to: Address, value: U256, data: &Bytes) -> Bytes;
}

/// `SimpleAccount.execute(dest, value, func)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleAccountEncoder;

impl CallEncoder for SimpleAccountEncoder {
    fn encode_call(&self, to: Address, value: U256, data: &Bytes) -> Bytes {
        ExecuteCall {
            dest: to,
            value,
            func: data.clone(),
        }
        .encode()
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_execute_with_known_selector() {
        let data = SimpleAccountEncoder.encode_call(
            Address::repeat_byte(0x22),
            U256::exp10(15),
            &Bytes::default(),
        );
        assert_eq!(&data[..4], &[0xb6, 0x1d, 0x27, 0xf6]);
        // selector + dest + value + offset + length
        assert_eq!(data.len(), 4 + 32 * 4);
        assert_eq!(&data[16..36], Address::repeat_byte(0x22).as_bytes());
    }
}
