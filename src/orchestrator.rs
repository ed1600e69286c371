use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tracing::{info, warn};

use crate::errors::{Result, TxFailure, UpgradeError};
use crate::manager::{LogicFactory, ProxyManager};
use crate::read::ChainReader;
use crate::resolver::{CrossCheckingResolver, LogicResolver};
use crate::types::{
    ChangeAssessment, LogicPointer, Outcome, Phase, ProbeOutcome, ProxyRecord, UpgradeAttempt,
    VerifyFailure, VersionProbe,
};
use crate::verify::ProbeSpec;

/// Caller-supplied bounds for a single upgrade run.
#[derive(Clone, Copy, Debug)]
pub struct RunConfig {
    /// How long to wait for the upgrade transaction to reach finality.
    /// Exceeding it abandons the wait; the transaction stays outstanding.
    pub finality_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { finality_timeout: Duration::from_secs(120) }
    }
}

/// Drives one upgrade attempt through its phases:
///
/// ```text
/// Init -> ResolvingBefore -> Upgrading -> Confirming -> ResolvingAfter
///      -> Verifying -> Terminal(Outcome)
/// ```
///
/// Phases run strictly in sequence; the only suspension point is the
/// finality wait, bounded by [`RunConfig::finality_timeout`]. One attempt
/// owns its snapshots outright, but callers must serialize attempts against
/// the same proxy themselves: the design assumes single-writer access to any
/// given proxy address.
pub struct UpgradeOrchestrator<P, C> {
    manager: Arc<P>,
    chain: Arc<C>,
    resolver: CrossCheckingResolver<P, C>,
}

impl<P, C> UpgradeOrchestrator<P, C>
where
    P: ProxyManager + Send + Sync,
    C: ChainReader + Send + Sync,
{
    pub fn new(manager: Arc<P>, chain: Arc<C>) -> Self {
        let resolver = CrossCheckingResolver::new(manager.clone(), chain.clone());
        Self { manager, chain, resolver }
    }

    /// Cross-checked resolution of the current logic address. Read-only;
    /// usable at any time, including while a stuck upgrade transaction is
    /// still outstanding.
    pub async fn resolve(&self, record: &ProxyRecord) -> Result<LogicPointer> {
        self.resolver.resolve(record).await
    }

    /// Runs a full upgrade attempt and classifies the result.
    ///
    /// Chain-decided results come back as the attempt's [`Outcome`];
    /// `Err` is reserved for conditions where no classification exists:
    /// missing configuration, a read failure, or the proxy address changing
    /// out from under the upgrade. Terminal attempts are never resumed;
    /// retrying means a fresh attempt.
    pub async fn run(
        &self,
        record: ProxyRecord,
        new_logic: LogicFactory,
        expected_version: &str,
        probes: &[ProbeSpec],
        config: &RunConfig,
    ) -> Result<UpgradeAttempt> {
        let mut attempt = UpgradeAttempt::new(record, new_logic);
        if record.proxy_address == Address::ZERO {
            return Err(UpgradeError::Config(
                "target proxy address is required and never inferred".into(),
            ));
        }

        attempt.phase = Phase::ResolvingBefore;
        let from = match self.resolver.resolve(&record).await {
            Ok(pointer) => pointer,
            Err(UpgradeError::ResolutionMismatch { library, slot, .. }) => {
                // Fail fast: never mutate chain state while the target is
                // unverifiable.
                attempt.finish(Outcome::TransactionFailed(TxFailure::Precondition(format!(
                    "resolution mismatch before upgrade: library {library} vs slot {slot}"
                ))));
                return Ok(attempt);
            }
            Err(e) => return Err(e),
        };
        attempt.from_pointer = Some(from);
        info!("current implementation of {}: {}", record.proxy_address, from.address);

        attempt.phase = Phase::Upgrading;
        info!("upgrading {} to {}", record.proxy_address, attempt.to_logic.name);
        let submission = match self
            .manager
            .submit_upgrade(record.proxy_address, &attempt.to_logic)
            .await
        {
            Ok(submission) => submission,
            Err(UpgradeError::Transaction(failure)) => {
                attempt.finish(Outcome::TransactionFailed(failure));
                return Ok(attempt);
            }
            Err(e) => return Err(e),
        };
        if submission.proxy_address != record.proxy_address {
            // The library silently redeployed instead of upgrading.
            return Err(UpgradeError::InvariantViolation {
                expected: record.proxy_address,
                actual: submission.proxy_address,
            });
        }

        attempt.phase = Phase::Confirming;
        match tokio::time::timeout(config.finality_timeout, self.manager.confirm(&submission)).await
        {
            Err(_) => {
                warn!(
                    "no finality within {:?}; transaction {:?} left outstanding",
                    config.finality_timeout, submission.tx_hash
                );
                attempt.finish(Outcome::TransactionFailed(TxFailure::Timeout(
                    config.finality_timeout,
                )));
                return Ok(attempt);
            }
            Ok(Err(UpgradeError::Transaction(failure))) => {
                attempt.finish(Outcome::TransactionFailed(failure));
                return Ok(attempt);
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(handle)) => {
                if handle.proxy_address != record.proxy_address {
                    return Err(UpgradeError::InvariantViolation {
                        expected: record.proxy_address,
                        actual: handle.proxy_address,
                    });
                }
            }
        }

        attempt.phase = Phase::ResolvingAfter;
        let to = self.resolver.resolve(&record).await?;
        attempt.to_pointer = Some(to);
        info!("implementation after upgrade: {}", to.address);
        if to.address == from.address {
            // Valid no-op: semantically identical bytecode resolves to the
            // same logic contract. Reported, not an error.
            attempt.finish(Outcome::AddressUnchanged);
            return Ok(attempt);
        }

        attempt.phase = Phase::Verifying;
        let outcome = self
            .verify(record.proxy_address, expected_version, probes)
            .await;
        attempt.finish(outcome);
        Ok(attempt)
    }

    /// Issues the version probe and then each declared feature probe against
    /// the proxy, delegated through to the new logic.
    async fn verify(&self, proxy: Address, expected_version: &str, probes: &[ProbeSpec]) -> Outcome {
        let observed = match ProbeSpec::version().call(&*self.chain, proxy).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!("version call failed on {proxy}: {e}");
                return Outcome::VerificationFailed(VerifyFailure::VersionMismatch {
                    expected: expected_version.to_string(),
                    observed: None,
                });
            }
        };
        if observed != expected_version {
            return Outcome::VerificationFailed(VerifyFailure::VersionMismatch {
                expected: expected_version.to_string(),
                observed: Some(observed),
            });
        }

        let mut report = VersionProbe {
            expected_version: expected_version.to_string(),
            observed_version: Some(observed),
            fields: BTreeMap::new(),
        };
        let mut degraded = false;
        for probe in probes {
            // A failing probe is recorded and the rest still run: partial
            // functionality visibility is useful signal.
            match probe.call(&*self.chain, proxy).await {
                Ok(value) => {
                    report.fields.insert(probe.field.clone(), ProbeOutcome::Value(value));
                }
                Err(e) => {
                    warn!("probe {} failed on {proxy}: {e}", probe.field);
                    report.fields.insert(probe.field.clone(), ProbeOutcome::Failed(e.to_string()));
                    degraded = true;
                }
            }
        }
        if degraded {
            Outcome::AddressChanged(ChangeAssessment::NoFunctionalChange(report))
        } else {
            Outcome::AddressChanged(ChangeAssessment::Verified(report))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use alloy_primitives::B256;
    use ethers_core::abi::{encode, Token};
    use ethers_core::types::H256;

    use super::*;
    use crate::consts::EIP_1967_IMPLEMENTATION_SLOT;
    use crate::manager::{ProxyHandle, UpgradeSubmission};
    use crate::types::{NetworkId, ResolutionPath};

    const PROXY: Address = Address::new([0xAA; 20]);
    const LOGIC_V1: Address = Address::new([0x11; 20]);
    const LOGIC_V2: Address = Address::new([0x22; 20]);

    #[derive(Clone, Copy)]
    enum ConfirmBehavior {
        Succeed,
        Revert,
        Hang,
    }

    struct FakeManager {
        logic: Arc<Mutex<Address>>,
        next_logic: Address,
        reported_proxy: Option<Address>,
        library_override: Option<Address>,
        confirm_behavior: ConfirmBehavior,
        submitted: AtomicBool,
    }

    impl ProxyManager for FakeManager {
        async fn deploy_behind_proxy(
            &self,
            _logic: &LogicFactory,
            _init_data: ethers_core::types::Bytes,
        ) -> Result<ProxyHandle> {
            Ok(ProxyHandle { proxy_address: PROXY, logic_address: *self.logic.lock().unwrap() })
        }

        async fn submit_upgrade(
            &self,
            proxy: Address,
            _new_logic: &LogicFactory,
        ) -> Result<UpgradeSubmission> {
            self.submitted.store(true, Ordering::SeqCst);
            Ok(UpgradeSubmission {
                proxy_address: self.reported_proxy.unwrap_or(proxy),
                new_logic_address: self.next_logic,
                tx_hash: H256::zero(),
            })
        }

        async fn confirm(&self, submission: &UpgradeSubmission) -> Result<ProxyHandle> {
            match self.confirm_behavior {
                ConfirmBehavior::Succeed => {
                    *self.logic.lock().unwrap() = self.next_logic;
                    Ok(ProxyHandle {
                        proxy_address: submission.proxy_address,
                        logic_address: self.next_logic,
                    })
                }
                ConfirmBehavior::Revert => Err(UpgradeError::Transaction(TxFailure::Reverted(
                    "transaction 0x00 reverted in block 7".into(),
                ))),
                ConfirmBehavior::Hang => futures::future::pending().await,
            }
        }

        async fn resolve_logic_address(&self, _proxy: Address) -> Result<Address> {
            Ok(self.library_override.unwrap_or(*self.logic.lock().unwrap()))
        }
    }

    struct FakeChain {
        logic: Arc<Mutex<Address>>,
        calls: HashMap<Vec<u8>, std::result::Result<Vec<u8>, String>>,
    }

    impl ChainReader for FakeChain {
        async fn read_slot(&self, account: Address, slot: B256) -> Result<[u8; 32]> {
            assert_eq!(account, PROXY);
            assert_eq!(slot, *EIP_1967_IMPLEMENTATION_SLOT);
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(self.logic.lock().unwrap().as_slice());
            Ok(word)
        }

        async fn call(&self, _target: Address, calldata: Vec<u8>) -> Result<Vec<u8>> {
            match self.calls.get(&calldata) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(reason)) => Err(UpgradeError::Rpc(reason.clone())),
                None => Err(UpgradeError::Rpc("execution reverted".into())),
            }
        }
    }

    struct Fixture {
        record: ProxyRecord,
        orchestrator: UpgradeOrchestrator<FakeManager, FakeChain>,
        manager: Arc<FakeManager>,
    }

    fn selector(signature: &str) -> Vec<u8> {
        ethers_core::utils::id(signature).to_vec()
    }

    fn string_return(value: &str) -> Vec<u8> {
        encode(&[Token::String(value.into())])
    }

    fn fixture(
        next_logic: Address,
        confirm_behavior: ConfirmBehavior,
        calls: HashMap<Vec<u8>, std::result::Result<Vec<u8>, String>>,
    ) -> Fixture {
        fixture_with(next_logic, confirm_behavior, calls, None, None)
    }

    fn fixture_with(
        next_logic: Address,
        confirm_behavior: ConfirmBehavior,
        calls: HashMap<Vec<u8>, std::result::Result<Vec<u8>, String>>,
        reported_proxy: Option<Address>,
        library_override: Option<Address>,
    ) -> Fixture {
        let logic = Arc::new(Mutex::new(LOGIC_V1));
        let manager = Arc::new(FakeManager {
            logic: logic.clone(),
            next_logic,
            reported_proxy,
            library_override,
            confirm_behavior,
            submitted: AtomicBool::new(false),
        });
        let chain = Arc::new(FakeChain { logic, calls });
        Fixture {
            record: ProxyRecord::new(PROXY, NetworkId(17000)),
            orchestrator: UpgradeOrchestrator::new(manager.clone(), chain),
            manager,
        }
    }

    fn factory() -> LogicFactory {
        LogicFactory {
            name: "VendingMachineV2".into(),
            abi: Default::default(),
            bytecode: Default::default(),
        }
    }

    fn v2_probes() -> Vec<ProbeSpec> {
        vec![
            ProbeSpec::parse("vendingMachineName() returns (string)").unwrap(),
            ProbeSpec::parse("isPaused() returns (bool)").unwrap(),
        ]
    }

    fn v2_calls() -> HashMap<Vec<u8>, std::result::Result<Vec<u8>, String>> {
        let mut calls = HashMap::new();
        calls.insert(selector("version()"), Ok(string_return("2.0.0")));
        calls.insert(selector("vendingMachineName()"), Ok(string_return("Sodas & Co")));
        calls.insert(selector("isPaused()"), Ok(encode(&[Token::Bool(false)])));
        calls
    }

    #[tokio::test]
    async fn resolve_twice_is_stable() {
        let f = fixture(LOGIC_V2, ConfirmBehavior::Succeed, HashMap::new());
        let first = f.orchestrator.resolve(&f.record).await.unwrap();
        let second = f.orchestrator.resolve(&f.record).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.address, LOGIC_V1);
        assert_eq!(first.resolved_via, ResolutionPath::CrossChecked);
    }

    #[tokio::test]
    async fn resolve_fails_closed_on_mismatch() {
        let stale = Address::new([0x99; 20]);
        let f = fixture_with(
            LOGIC_V2,
            ConfirmBehavior::Succeed,
            HashMap::new(),
            None,
            Some(stale),
        );
        let err = f.orchestrator.resolve(&f.record).await.unwrap_err();
        match err {
            UpgradeError::ResolutionMismatch { proxy, library, slot } => {
                assert_eq!(proxy, PROXY);
                assert_eq!(library, stale);
                assert_eq!(slot, LOGIC_V1);
            }
            other => panic!("expected ResolutionMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_upgrade_is_verified_with_probe_values() {
        let f = fixture(LOGIC_V2, ConfirmBehavior::Succeed, v2_calls());
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &v2_probes(), &RunConfig::default())
            .await
            .unwrap();

        assert!(attempt.is_terminal());
        assert_eq!(attempt.from_pointer.unwrap().address, LOGIC_V1);
        assert_eq!(attempt.to_pointer.unwrap().address, LOGIC_V2);
        match attempt.outcome {
            Outcome::AddressChanged(ChangeAssessment::Verified(report)) => {
                assert_eq!(report.observed_version.as_deref(), Some("2.0.0"));
                assert_eq!(
                    report.fields.get("vendingMachineName"),
                    Some(&ProbeOutcome::Value("Sodas & Co".into()))
                );
                assert_eq!(
                    report.fields.get("isPaused"),
                    Some(&ProbeOutcome::Value("false".into()))
                );
            }
            other => panic!("expected verified outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn noop_upgrade_reports_address_unchanged() {
        // Redeploying semantically identical bytecode resolves to the same
        // logic address; that is reported, not treated as an error.
        let f = fixture(LOGIC_V1, ConfirmBehavior::Succeed, v2_calls());
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &v2_probes(), &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(attempt.outcome, Outcome::AddressUnchanged);
        assert_eq!(attempt.to_pointer.unwrap().address, LOGIC_V1);
    }

    #[tokio::test]
    async fn version_call_failure_is_verification_failed() {
        let mut calls = v2_calls();
        calls.insert(selector("version()"), Err("function selector not found".into()));
        let f = fixture(LOGIC_V2, ConfirmBehavior::Succeed, calls);
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &v2_probes(), &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(
            attempt.outcome,
            Outcome::VerificationFailed(VerifyFailure::VersionMismatch {
                expected: "2.0.0".into(),
                observed: None,
            })
        );
    }

    #[tokio::test]
    async fn unexpected_version_value_is_recorded() {
        let mut calls = v2_calls();
        calls.insert(selector("version()"), Ok(string_return("1.0.0")));
        let f = fixture(LOGIC_V2, ConfirmBehavior::Succeed, calls);
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &v2_probes(), &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(
            attempt.outcome,
            Outcome::VerificationFailed(VerifyFailure::VersionMismatch {
                expected: "2.0.0".into(),
                observed: Some("1.0.0".into()),
            })
        );
    }

    #[tokio::test]
    async fn failing_feature_probe_downgrades_not_aborts() {
        let mut calls = v2_calls();
        calls.remove(&selector("isPaused()"));
        let f = fixture(LOGIC_V2, ConfirmBehavior::Succeed, calls);
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &v2_probes(), &RunConfig::default())
            .await
            .unwrap();
        match attempt.outcome {
            Outcome::AddressChanged(ChangeAssessment::NoFunctionalChange(report)) => {
                // The successful probe is still recorded alongside the failure.
                assert_eq!(
                    report.fields.get("vendingMachineName"),
                    Some(&ProbeOutcome::Value("Sodas & Co".into()))
                );
                assert!(matches!(
                    report.fields.get("isPaused"),
                    Some(ProbeOutcome::Failed(_))
                ));
            }
            other => panic!("expected downgraded outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn changed_proxy_address_raises_invariant_violation() {
        let redeployed = Address::new([0xBB; 20]);
        let f = fixture_with(
            LOGIC_V2,
            ConfirmBehavior::Succeed,
            v2_calls(),
            Some(redeployed),
            None,
        );
        let err = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &[], &RunConfig::default())
            .await
            .unwrap_err();
        match err {
            UpgradeError::InvariantViolation { expected, actual } => {
                assert_eq!(expected, PROXY);
                assert_eq!(actual, redeployed);
            }
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finality_timeout_terminates_attempt_but_not_reads() {
        let f = fixture(LOGIC_V2, ConfirmBehavior::Hang, v2_calls());
        let config = RunConfig { finality_timeout: Duration::from_millis(50) };
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &[], &config)
            .await
            .unwrap();
        assert_eq!(
            attempt.outcome,
            Outcome::TransactionFailed(TxFailure::Timeout(config.finality_timeout))
        );
        // The read path is unaffected by the stuck transaction.
        let pointer = f.orchestrator.resolve(&f.record).await.unwrap();
        assert_eq!(pointer.address, LOGIC_V1);
    }

    #[tokio::test]
    async fn reverted_confirmation_is_transaction_failed() {
        let f = fixture(LOGIC_V2, ConfirmBehavior::Revert, v2_calls());
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &[], &RunConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            attempt.outcome,
            Outcome::TransactionFailed(TxFailure::Reverted(_))
        ));
    }

    #[tokio::test]
    async fn pre_upgrade_mismatch_terminates_without_submitting() {
        let stale = Address::new([0x99; 20]);
        let f = fixture_with(
            LOGIC_V2,
            ConfirmBehavior::Succeed,
            v2_calls(),
            None,
            Some(stale),
        );
        let attempt = f
            .orchestrator
            .run(f.record, factory(), "2.0.0", &[], &RunConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            attempt.outcome,
            Outcome::TransactionFailed(TxFailure::Precondition(_))
        ));
        assert!(!f.manager.submitted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn zero_proxy_address_is_config_error() {
        let f = fixture(LOGIC_V2, ConfirmBehavior::Succeed, HashMap::new());
        let record = ProxyRecord::new(Address::ZERO, NetworkId(17000));
        let err = f
            .orchestrator
            .run(record, factory(), "2.0.0", &[], &RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UpgradeError::Config(_)));
    }
}
