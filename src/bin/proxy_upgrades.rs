use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::Context;
use clap::{Parser, Subcommand};
use ethers_middleware::SignerMiddleware;
use ethers_providers::{Http, Middleware, Provider};
use ethers_signers::{LocalWallet, Signer};
use evm_proxy_upgrades::{
    ChangeAssessment, Erc1967Manager, LogicFactory, NetworkId, Outcome, ProbeOutcome, ProbeSpec,
    ProxyManager, ProxyRecord, RpcChainReader, RunConfig, UpgradeAttempt, UpgradeError,
    UpgradeOrchestrator,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(short = 'r', long = "rpc-url", env = "ETH_RPC_URL")]
    url: String,

    /// Target proxy address. Required for resolve and upgrade, never inferred.
    #[clap(long, env = "PROXY_ADDRESS")]
    proxy: Option<String>,

    #[clap(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Bound on the wait for upgrade-transaction finality, in seconds.
    #[clap(long, default_value_t = 120)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy a logic contract behind a fresh ERC-1967 proxy
    Deploy {
        /// Hardhat build artifact of the logic contract
        #[clap(long)]
        logic: PathBuf,

        /// Hardhat build artifact of the proxy contract
        #[clap(long)]
        proxy_artifact: PathBuf,

        /// Hex-encoded initializer calldata passed to the proxy constructor
        #[clap(long, default_value = "0x")]
        init_data: String,
    },

    /// Print the cross-checked implementation address of the proxy
    Resolve,

    /// Upgrade the proxy to a new logic contract and verify the result
    Upgrade {
        /// Hardhat build artifact of the new logic contract
        #[clap(long)]
        logic: PathBuf,

        /// Version string the upgraded contract must report
        #[clap(long)]
        expect_version: String,

        /// Feature probe, e.g. "isPaused() returns (bool)". Repeatable.
        #[clap(long = "probe")]
        probes: Vec<String>,
    },
}

fn required_proxy(proxy: &Option<String>) -> Result<Address, UpgradeError> {
    let raw = proxy
        .as_deref()
        .ok_or_else(|| UpgradeError::Config("PROXY_ADDRESS not set".into()))?;
    Address::from_str(raw).map_err(|e| UpgradeError::Config(format!("bad proxy address {raw:?}: {e}")))
}

fn narrate(attempt: &UpgradeAttempt) {
    println!("----------------------------------------");
    println!("IMPLEMENTATION ADDRESSES:");
    if let Some(from) = attempt.from_pointer {
        println!("Before upgrade: {}", from.address);
    }
    if let Some(to) = attempt.to_pointer {
        println!("After upgrade: {}", to.address);
    }
    println!("----------------------------------------");
    match &attempt.outcome {
        Outcome::AddressUnchanged => {
            println!("NOTE: the implementation address has not changed.");
            println!("This can happen when the new bytecode matches the old.");
        }
        Outcome::AddressChanged(ChangeAssessment::Verified(report)) => {
            println!(
                "Upgrade verified; contract reports version {}",
                report.observed_version.as_deref().unwrap_or("<none>")
            );
            for (field, value) in &report.fields {
                match value {
                    ProbeOutcome::Value(value) => println!("{field}: {value}"),
                    ProbeOutcome::Failed(reason) => println!("{field}: FAILED ({reason})"),
                }
            }
        }
        Outcome::AddressChanged(ChangeAssessment::NoFunctionalChange(report)) => {
            println!("Implementation changed but some feature probes failed.");
            println!("The upgrade may not have rolled out the full functionality.");
            for (field, value) in &report.fields {
                match value {
                    ProbeOutcome::Value(value) => println!("{field}: {value}"),
                    ProbeOutcome::Failed(reason) => println!("{field}: FAILED ({reason})"),
                }
            }
        }
        outcome => println!("{outcome}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let provider =
        Provider::<Http>::try_from(args.url.as_str()).context("failed to parse RPC URL")?;
    let chain_id = provider
        .get_chainid()
        .await
        .context("failed to query chain id")?
        .as_u64();
    let network = NetworkId(chain_id);

    match args.command {
        Command::Deploy { logic, proxy_artifact, init_data } => {
            let key = args
                .private_key
                .ok_or_else(|| UpgradeError::Config("PRIVATE_KEY not set".into()))?;
            let wallet = LocalWallet::from_str(key.trim_start_matches("0x"))
                .context("failed to parse private key")?
                .with_chain_id(chain_id);
            let client = Arc::new(SignerMiddleware::new(provider, wallet));

            let logic = LogicFactory::from_artifact(&logic)?;
            let proxy_factory = LogicFactory::from_artifact(&proxy_artifact)?;
            let init_data = hex::decode(init_data.trim_start_matches("0x"))
                .map_err(|e| UpgradeError::Config(format!("bad init data: {e}")))?;

            println!("Deploying {}...", logic.name);
            let manager = Erc1967Manager::new(client).with_proxy_factory(proxy_factory);
            let handle = manager.deploy_behind_proxy(&logic, init_data.into()).await?;
            println!("Proxy contract address: {}", handle.proxy_address);
            println!("Implementation contract address: {}", handle.logic_address);
        }

        Command::Resolve => {
            let proxy = required_proxy(&args.proxy)?;
            let client = Arc::new(provider);
            let manager = Arc::new(Erc1967Manager::new(client.clone()));
            let chain = Arc::new(RpcChainReader::new(client));
            let orchestrator = UpgradeOrchestrator::new(manager, chain);

            let pointer = orchestrator.resolve(&ProxyRecord::new(proxy, network)).await?;
            println!("Proxy address: {proxy}");
            println!("Implementation address: {}", pointer.address);
        }

        Command::Upgrade { logic, expect_version, probes } => {
            let proxy = required_proxy(&args.proxy)?;
            let key = args
                .private_key
                .ok_or_else(|| UpgradeError::Config("PRIVATE_KEY not set".into()))?;
            let wallet = LocalWallet::from_str(key.trim_start_matches("0x"))
                .context("failed to parse private key")?
                .with_chain_id(chain_id);
            let client = Arc::new(SignerMiddleware::new(provider, wallet));

            let logic = LogicFactory::from_artifact(&logic)?;
            let probes = probes
                .iter()
                .map(|probe| ProbeSpec::parse(probe))
                .collect::<Result<Vec<_>, _>>()?;

            let manager = Arc::new(Erc1967Manager::new(client.clone()));
            let chain = Arc::new(RpcChainReader::new(client));
            let orchestrator = UpgradeOrchestrator::new(manager, chain);

            println!("Upgrading to {}...", logic.name);
            let config = RunConfig { finality_timeout: Duration::from_secs(args.timeout_secs) };
            let attempt = orchestrator
                .run(ProxyRecord::new(proxy, network), logic, &expect_version, &probes, &config)
                .await?;
            narrate(&attempt);
        }
    }

    Ok(())
}
