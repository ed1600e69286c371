use alloy_primitives::B256;
use once_cell::sync::Lazy;

/// EIP-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
///
/// Every proxy following the standard keeps the current logic-contract address
/// left-zero-padded in this slot of the proxy account itself. The slot is a
/// protocol constant, never configurable per proxy.
pub static EIP_1967_IMPLEMENTATION_SLOT: Lazy<B256> = Lazy::new(|| {
    B256::new(hex_literal::hex!(
        "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc"
    ))
});

/// EIP-1967 admin slot: `keccak256("eip1967.proxy.admin") - 1`.
pub static EIP_1967_ADMIN_SLOT: Lazy<B256> = Lazy::new(|| {
    B256::new(hex_literal::hex!(
        "b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103"
    ))
});
