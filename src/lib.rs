//! evm-proxy-upgrades deploys, upgrades and verifies contracts behind
//! ERC-1967 proxies.
//!
//! This crate provides:
//! - Cross-checked resolution of the logic contract a proxy delegates to,
//!   combining the managing library's lookup with a raw read of the
//!   standardized implementation slot
//! - An upgrade orchestrator that swaps the logic contract behind an
//!   unchanged proxy address and verifies the result with typed probes
//! - A four-way outcome classification so no-op upgrades, partial rollouts
//!   and full successes stay distinguishable
//!
//! # Example
//! ```no_run
//! use evm_proxy_upgrades::{
//!     NetworkId, ProbeSpec, ProxyRecord, RunConfig, UpgradeOrchestrator,
//! };
//!
//! # async fn example(
//! #     orchestrator: UpgradeOrchestrator<
//! #         evm_proxy_upgrades::Erc1967Manager<ethers_providers::Provider<ethers_providers::Http>>,
//! #         evm_proxy_upgrades::RpcChainReader<ethers_providers::Provider<ethers_providers::Http>>,
//! #     >,
//! #     factory: evm_proxy_upgrades::LogicFactory,
//! # ) -> evm_proxy_upgrades::Result<()> {
//! let record = ProxyRecord::new("0xAAA0000000000000000000000000000000000000".parse().unwrap(), NetworkId(17000));
//! let probes = vec![ProbeSpec::parse("isPaused() returns (bool)")?];
//! let attempt = orchestrator
//!     .run(record, factory, "2.0.0", &probes, &RunConfig::default())
//!     .await?;
//! println!("{}", attempt.outcome);
//! # Ok(())
//! # }
//! ```

mod consts;
mod errors;
mod manager;
mod orchestrator;
mod read;
mod resolver;
mod types;
pub mod utils;
mod verify;

pub use consts::{EIP_1967_ADMIN_SLOT, EIP_1967_IMPLEMENTATION_SLOT};
pub use errors::{Result, TxFailure, UpgradeError};
pub use manager::{Erc1967Manager, LogicFactory, ProxyHandle, ProxyManager, UpgradeSubmission};
pub use orchestrator::{RunConfig, UpgradeOrchestrator};
pub use read::{ChainReader, RpcChainReader};
pub use resolver::{CrossCheckingResolver, LogicResolver, MetadataResolver, SlotResolver};
pub use types::{
    ChangeAssessment, LogicPointer, NetworkId, Outcome, Phase, ProbeOutcome, ProxyRecord,
    ResolutionPath, UpgradeAttempt, VerifyFailure, VersionProbe,
};
pub use verify::ProbeSpec;

// Re-export common types for convenience
pub use alloy_primitives::{Address, B256, U256};
