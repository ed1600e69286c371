use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::consts::EIP_1967_IMPLEMENTATION_SLOT;
use crate::errors::{Result, UpgradeError};
use crate::manager::ProxyManager;
use crate::read::ChainReader;
use crate::types::{LogicPointer, ProxyRecord, ResolutionPath};
use crate::utils::decode_slot_address;

/// A strategy for resolving the logic contract a proxy delegates to.
pub trait LogicResolver {
    fn resolve(
        &self,
        proxy: &ProxyRecord,
    ) -> impl Future<Output = Result<LogicPointer>> + Send;
}

/// Resolution through the proxy-management library's lookup. Convenient but
/// not authoritative: the library may answer from stale or
/// environment-mismatched deployment metadata.
pub struct MetadataResolver<P> {
    manager: Arc<P>,
}

impl<P> MetadataResolver<P> {
    pub fn new(manager: Arc<P>) -> Self {
        Self { manager }
    }
}

impl<P: ProxyManager + Send + Sync> LogicResolver for MetadataResolver<P> {
    async fn resolve(&self, proxy: &ProxyRecord) -> Result<LogicPointer> {
        let address = self.manager.resolve_logic_address(proxy.proxy_address).await?;
        debug!("library resolves {} -> {address}", proxy.proxy_address);
        Ok(LogicPointer { address, resolved_via: ResolutionPath::LibraryCall })
    }
}

/// Resolution by reading the EIP-1967 implementation slot off the proxy
/// account itself. Ground truth: this is the word the proxy dispatches on.
pub struct SlotResolver<C> {
    chain: Arc<C>,
}

impl<C> SlotResolver<C> {
    pub fn new(chain: Arc<C>) -> Self {
        Self { chain }
    }
}

impl<C: ChainReader + Send + Sync> LogicResolver for SlotResolver<C> {
    async fn resolve(&self, proxy: &ProxyRecord) -> Result<LogicPointer> {
        let word = self
            .chain
            .read_slot(proxy.proxy_address, *EIP_1967_IMPLEMENTATION_SLOT)
            .await?;
        let address = decode_slot_address(&word);
        debug!("implementation slot of {} -> {address}", proxy.proxy_address);
        Ok(LogicPointer { address, resolved_via: ResolutionPath::RawSlotRead })
    }
}

/// Runs both resolution paths and fails closed if they disagree.
///
/// Catches operator misconfiguration (wrong network, stale manifest) before
/// an upgrade is attempted against the wrong target. Neither value is ever
/// silently preferred.
pub struct CrossCheckingResolver<P, C> {
    library: MetadataResolver<P>,
    slot: SlotResolver<C>,
}

impl<P, C> CrossCheckingResolver<P, C> {
    pub fn new(manager: Arc<P>, chain: Arc<C>) -> Self {
        Self {
            library: MetadataResolver::new(manager),
            slot: SlotResolver::new(chain),
        }
    }
}

impl<P, C> LogicResolver for CrossCheckingResolver<P, C>
where
    P: ProxyManager + Send + Sync,
    C: ChainReader + Send + Sync,
{
    async fn resolve(&self, proxy: &ProxyRecord) -> Result<LogicPointer> {
        let (library, slot) =
            futures::try_join!(self.library.resolve(proxy), self.slot.resolve(proxy))?;
        if library.address != slot.address {
            warn!(
                "resolution mismatch for {}: library {} vs slot {}",
                proxy.proxy_address, library.address, slot.address
            );
            return Err(UpgradeError::ResolutionMismatch {
                proxy: proxy.proxy_address,
                library: library.address,
                slot: slot.address,
            });
        }
        Ok(LogicPointer {
            address: slot.address,
            resolved_via: ResolutionPath::CrossChecked,
        })
    }
}
