use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use ethers_contract::{abigen, ContractError, ContractFactory};
use ethers_core::abi::Abi;
use ethers_core::types::{Bytes, H256};
use ethers_providers::Middleware;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{Result, TxFailure, UpgradeError};
use crate::utils::{address_to_h160, h160_to_address};

abigen!(
    IErc897Proxy,
    r"[
    function implementation() external view returns (address)
]",
);

abigen!(
    IUupsUpgradeable,
    r"[
    function upgradeTo(address newImplementation) external
]",
);

/// A compiled logic contract ready to deploy: name, ABI and creation
/// bytecode, as found in a Hardhat-style build artifact.
#[derive(Clone, Debug)]
pub struct LogicFactory {
    pub name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
}

#[derive(Deserialize)]
struct ArtifactJson {
    #[serde(rename = "contractName")]
    contract_name: String,
    abi: Abi,
    bytecode: Bytes,
}

impl LogicFactory {
    /// Loads a factory from a Hardhat build artifact JSON file.
    pub fn from_artifact(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| UpgradeError::Config(format!("cannot read artifact {path:?}: {e}")))?;
        let artifact: ArtifactJson = serde_json::from_str(&raw)
            .map_err(|e| UpgradeError::Config(format!("malformed artifact {path:?}: {e}")))?;
        Ok(Self {
            name: artifact.contract_name,
            abi: artifact.abi,
            bytecode: artifact.bytecode,
        })
    }
}

/// A deployed or upgraded proxy as reported by the managing library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyHandle {
    pub proxy_address: Address,
    pub logic_address: Address,
}

/// An upgrade transaction that has been submitted but not yet confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpgradeSubmission {
    /// The proxy address as reported back by the library. Must equal the
    /// address the upgrade was requested for; the orchestrator checks.
    pub proxy_address: Address,
    pub new_logic_address: Address,
    pub tx_hash: H256,
}

/// The proxy-management library, black-boxed.
///
/// `submit_upgrade` and `confirm` together form the library's "swap logic
/// behind proxy" primitive; they are split so the caller owns the finality
/// wait and can bound or abandon it without losing the submission.
pub trait ProxyManager {
    /// Deploys `logic` and a fresh proxy delegating to it, initialized with
    /// `init_data` calldata.
    fn deploy_behind_proxy(
        &self,
        logic: &LogicFactory,
        init_data: Bytes,
    ) -> impl Future<Output = Result<ProxyHandle>> + Send;

    /// Deploys `new_logic` and submits the transaction pointing `proxy` at
    /// it. Returns as soon as the transaction is in flight.
    fn submit_upgrade(
        &self,
        proxy: Address,
        new_logic: &LogicFactory,
    ) -> impl Future<Output = Result<UpgradeSubmission>> + Send;

    /// Blocks until `submission` reaches finality. A revert is
    /// `TxFailure::Reverted`; the caller supplies any timeout.
    fn confirm(
        &self,
        submission: &UpgradeSubmission,
    ) -> impl Future<Output = Result<ProxyHandle>> + Send;

    /// The library's own view of which logic contract `proxy` delegates to.
    /// May consult deployment metadata in addition to chain state, which is
    /// exactly why callers cross-check it against the raw slot.
    fn resolve_logic_address(
        &self,
        proxy: Address,
    ) -> impl Future<Output = Result<Address>> + Send;
}

/// [`ProxyManager`] for EIP-1967 proxies with UUPS-style upgrades, driven
/// through a signing middleware.
pub struct Erc1967Manager<M> {
    client: Arc<M>,
    proxy_factory: Option<LogicFactory>,
    poll_interval: Duration,
}

impl<M: Middleware + 'static> Erc1967Manager<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self {
            client,
            proxy_factory: None,
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Supplies the proxy contract artifact required by
    /// [`ProxyManager::deploy_behind_proxy`].
    pub fn with_proxy_factory(mut self, proxy_factory: LogicFactory) -> Self {
        self.proxy_factory = Some(proxy_factory);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn deploy_contract(
        &self,
        factory: &LogicFactory,
        args: impl ethers_core::abi::Tokenize,
    ) -> Result<Address> {
        info!("deploying {}", factory.name);
        let deployed = ContractFactory::new(
            factory.abi.clone(),
            factory.bytecode.clone(),
            self.client.clone(),
        )
        .deploy(args)
        .map_err(contract_failure)?
        .send()
        .await
        .map_err(contract_failure)?;
        let address = h160_to_address(&deployed.address());
        info!("{} deployed at {address}", factory.name);
        Ok(address)
    }
}

fn contract_failure<M: Middleware>(err: ContractError<M>) -> UpgradeError {
    let failure = match &err {
        ContractError::Revert(_) => TxFailure::Reverted(err.to_string()),
        _ => TxFailure::Transport(err.to_string()),
    };
    UpgradeError::Transaction(failure)
}

impl<M: Middleware + 'static> ProxyManager for Erc1967Manager<M> {
    async fn deploy_behind_proxy(
        &self,
        logic: &LogicFactory,
        init_data: Bytes,
    ) -> Result<ProxyHandle> {
        let proxy_factory = self.proxy_factory.as_ref().ok_or_else(|| {
            UpgradeError::Config("no proxy artifact configured for deployment".into())
        })?;
        let logic_address = self.deploy_contract(logic, ()).await?;
        let proxy_address = self
            .deploy_contract(proxy_factory, (address_to_h160(&logic_address), init_data))
            .await?;
        Ok(ProxyHandle { proxy_address, logic_address })
    }

    async fn submit_upgrade(
        &self,
        proxy: Address,
        new_logic: &LogicFactory,
    ) -> Result<UpgradeSubmission> {
        let new_logic_address = self.deploy_contract(new_logic, ()).await?;
        info!("upgrading proxy {proxy} to {new_logic_address}");
        let call = IUupsUpgradeable::new(address_to_h160(&proxy), self.client.clone())
            .upgrade_to(address_to_h160(&new_logic_address));
        let pending = call.send().await.map_err(contract_failure)?;
        let tx_hash = *pending;
        debug!("upgrade submitted in {tx_hash:?}");
        Ok(UpgradeSubmission {
            proxy_address: proxy,
            new_logic_address,
            tx_hash,
        })
    }

    async fn confirm(&self, submission: &UpgradeSubmission) -> Result<ProxyHandle> {
        loop {
            let receipt = self
                .client
                .get_transaction_receipt(submission.tx_hash)
                .await
                .map_err(|e| UpgradeError::Rpc(e.to_string()))?;
            if let Some(receipt) = receipt {
                if receipt.status == Some(1u64.into()) {
                    debug!("upgrade {:?} mined in block {:?}", submission.tx_hash, receipt.block_number);
                    return Ok(ProxyHandle {
                        proxy_address: submission.proxy_address,
                        logic_address: submission.new_logic_address,
                    });
                }
                return Err(UpgradeError::Transaction(TxFailure::Reverted(format!(
                    "transaction {:?} reverted in block {:?}",
                    submission.tx_hash, receipt.block_number
                ))));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn resolve_logic_address(&self, proxy: Address) -> Result<Address> {
        let implementation = IErc897Proxy::new(address_to_h160(&proxy), self.client.clone())
            .implementation()
            .call()
            .await
            .map_err(|e| UpgradeError::Rpc(e.to_string()))?;
        Ok(h160_to_address(&implementation))
    }
}
