//! Sender address → VM name, with a process-lifetime cache.
//!
//! Entries are added on first successful resolution and never evicted. A
//! VM whose address is later reassigned keeps its stale entry until the
//! process restarts. Failed resolutions are not cached, so the next
//! report from the same sender retries from scratch.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, info};

use pricecap_backend::{ActuationGateway, VirtBackend};
use pricecap_core::VmName;

use crate::arp::AddressResolver;
use crate::error::TelemetryResult;

/// Cache counters, reported for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct IdentityResolver<A> {
    addresses: A,
    cache: HashMap<IpAddr, VmName>,
    stats: CacheStats,
}

impl<A: AddressResolver> IdentityResolver<A> {
    pub fn new(addresses: A) -> Self {
        Self {
            addresses,
            cache: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Resolve `sender` to a VM name.
    pub async fn resolve<B: VirtBackend>(
        &mut self,
        sender: IpAddr,
        gateway: &ActuationGateway<B>,
    ) -> TelemetryResult<VmName> {
        if let Some(vm) = self.cache.get(&sender) {
            self.stats.hits += 1;
            return Ok(vm.clone());
        }
        self.stats.misses += 1;

        let mac = self.addresses.hardware_address(sender)?;
        debug!(%sender, %mac, "resolved hardware address");

        let vm = gateway.lookup_by_mac(&mac).await?;
        info!(%sender, %mac, %vm, "new telemetry sender");

        self.cache.insert(sender, vm.clone());
        Ok(vm)
    }

    /// Cached name for `sender`, without resolving.
    pub fn cached(&self, sender: &IpAddr) -> Option<&str> {
        self.cache.get(sender).map(String::as_str)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
