use alloy_primitives::{Address, B256};
use ethers_core::types::{H160, H256};

/// Converts an alloy address to an ethers `H160`.
#[inline(always)]
pub fn address_to_h160(address: &Address) -> H160 {
    H160::from_slice(address.as_slice())
}

/// Converts an ethers `H160` to an alloy address.
#[inline(always)]
pub fn h160_to_address(address: &H160) -> Address {
    Address::from_slice(address.as_bytes())
}

/// Converts an alloy 32-byte word to an ethers `H256`.
#[inline(always)]
pub fn b256_to_h256(word: &B256) -> H256 {
    H256(word.0)
}

/// Decodes an address from a 32-byte storage word by taking the low-order
/// 20 bytes. The upper 12 bytes are ignored, not validated: slots following
/// the EIP-1967 convention are left-zero-padded today but may pack additional
/// metadata in future revisions.
#[inline(always)]
pub fn decode_slot_address(word: &[u8; 32]) -> Address {
    Address::from_slice(&word[12..])
}
