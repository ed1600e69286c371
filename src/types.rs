use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::Address;

use crate::errors::TxFailure;
use crate::manager::LogicFactory;

/// Identifies the network a proxy lives on (EIP-155 chain id).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkId(pub u64);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain {}", self.0)
    }
}

/// A single deployed proxy instance.
///
/// Created once at deployment time and immutable afterwards: the proxy
/// address never changes for the lifetime of the record. Everything the
/// orchestrator does exists to verify that this stays true across upgrades.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyRecord {
    pub proxy_address: Address,
    pub network: NetworkId,
}

impl ProxyRecord {
    pub fn new(proxy_address: Address, network: NetworkId) -> Self {
        Self { proxy_address, network }
    }
}

/// How a logic address was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionPath {
    /// The proxy-management library's own lookup, which may consult
    /// off-chain deployment metadata in addition to chain state.
    LibraryCall,

    /// A raw read of the EIP-1967 implementation slot. Ground truth.
    RawSlotRead,

    /// Both paths, compared and found in agreement.
    CrossChecked,
}

/// A snapshot of which logic contract a proxy currently delegates to.
///
/// Immutable once produced. Two pointers taken for the same proxy at the
/// same block must carry equal addresses; disagreement between the two
/// resolution paths is a consistency fault, never silently resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogicPointer {
    pub address: Address,
    pub resolved_via: ResolutionPath,
}

/// The phases an upgrade attempt moves through, strictly in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    ResolvingBefore,
    Upgrading,
    Confirming,
    ResolvingAfter,
    Verifying,
    Terminal,
}

/// The result of one post-upgrade verification pass. Produced fresh per
/// pass, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionProbe {
    pub expected_version: String,
    pub observed_version: Option<String>,
    pub fields: BTreeMap<String, ProbeOutcome>,
}

/// What a single feature probe produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The call succeeded; the decoded return value, rendered.
    Value(String),

    /// The call reverted or the function is missing on the new logic.
    Failed(String),
}

/// Why verification failed outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyFailure {
    /// The version call reverted (`observed` is `None`) or returned a value
    /// other than the expected one.
    VersionMismatch {
        expected: String,
        observed: Option<String>,
    },
}

/// Assessment of an upgrade that did change the logic address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeAssessment {
    /// Version matched and every declared feature probe succeeded.
    Verified(VersionProbe),

    /// Version matched but at least one feature probe failed; the partial
    /// results are still recorded.
    NoFunctionalChange(VersionProbe),
}

/// Terminal classification of an upgrade attempt.
///
/// Deliberately four-way rather than pass/fail: identical bytecode,
/// partially rolled-out logic and full success are all distinguishable,
/// actionable states for an operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The attempt has not reached a terminal phase yet.
    Pending,

    /// The logic address is the same before and after. Valid, not an error:
    /// redeploying semantically identical bytecode lands here.
    AddressUnchanged,

    /// The logic address changed; carries the verification assessment.
    AddressChanged(ChangeAssessment),

    /// The logic address changed but the new logic does not behave as
    /// expected.
    VerificationFailed(VerifyFailure),

    /// The upgrade transaction never took effect.
    TransactionFailed(TxFailure),
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pending => write!(f, "pending"),
            Outcome::AddressUnchanged => write!(f, "implementation address unchanged"),
            Outcome::AddressChanged(ChangeAssessment::Verified(_)) => {
                write!(f, "implementation changed, all probes verified")
            }
            Outcome::AddressChanged(ChangeAssessment::NoFunctionalChange(_)) => {
                write!(f, "implementation changed, feature probes incomplete")
            }
            Outcome::VerificationFailed(VerifyFailure::VersionMismatch { expected, observed }) => {
                match observed {
                    Some(observed) => {
                        write!(f, "verification failed: version {observed} != expected {expected}")
                    }
                    None => write!(f, "verification failed: version call failed (expected {expected})"),
                }
            }
            Outcome::TransactionFailed(failure) => write!(f, "transaction failed: {failure}"),
        }
    }
}

/// One upgrade attempt against one proxy.
///
/// Created when the upgrade is initiated, mutated as each phase completes,
/// final once `outcome` is terminal. Never resumed or retried: retrying
/// means creating a fresh attempt.
#[derive(Clone, Debug)]
pub struct UpgradeAttempt {
    pub proxy: ProxyRecord,
    pub from_pointer: Option<LogicPointer>,
    pub to_logic: LogicFactory,
    pub to_pointer: Option<LogicPointer>,
    pub phase: Phase,
    pub outcome: Outcome,
}

impl UpgradeAttempt {
    pub fn new(proxy: ProxyRecord, to_logic: LogicFactory) -> Self {
        Self {
            proxy,
            from_pointer: None,
            to_logic,
            to_pointer: None,
            phase: Phase::Init,
            outcome: Outcome::Pending,
        }
    }

    /// Moves the attempt to its terminal state.
    pub(crate) fn finish(&mut self, outcome: Outcome) {
        debug_assert!(outcome.is_terminal());
        self.phase = Phase::Terminal;
        self.outcome = outcome;
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Terminal
    }
}
