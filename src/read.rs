use std::sync::Arc;

use alloy_primitives::{Address, B256};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::TransactionRequest;
use ethers_providers::Middleware;
use tracing::debug;

use crate::errors::{Result, UpgradeError};
use crate::utils::{address_to_h160, b256_to_h256};

/// Read-only chain access, abstracted so every phase of an upgrade can be
/// exercised against a fake transport.
///
/// No retry, no caching: each read reflects chain state at call time.
pub trait ChainReader {
    /// Returns the raw 32-byte word stored at `slot` on `account`.
    fn read_slot(
        &self,
        account: Address,
        slot: B256,
    ) -> impl std::future::Future<Output = Result<[u8; 32]>> + Send;

    /// Executes a read-only call against `target` and returns the raw
    /// return data. A revert surfaces as an error.
    fn call(
        &self,
        target: Address,
        calldata: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

/// [`ChainReader`] over a live JSON-RPC connection.
pub struct RpcChainReader<M> {
    rpc: Arc<M>,
}

impl<M> RpcChainReader<M> {
    pub fn new(rpc: Arc<M>) -> Self {
        Self { rpc }
    }
}

impl<M: Middleware + 'static> ChainReader for RpcChainReader<M> {
    async fn read_slot(&self, account: Address, slot: B256) -> Result<[u8; 32]> {
        let word = self
            .rpc
            .get_storage_at(address_to_h160(&account), b256_to_h256(&slot), None)
            .await
            .map_err(|e| UpgradeError::Rpc(e.to_string()))?;
        debug!("storage {slot} @ {account}: {word:?}");
        Ok(word.0)
    }

    async fn call(&self, target: Address, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(address_to_h160(&target))
            .data(calldata)
            .into();
        let output = self
            .rpc
            .call(&tx, None)
            .await
            .map_err(|e| UpgradeError::Rpc(e.to_string()))?;
        Ok(output.to_vec())
    }
}
