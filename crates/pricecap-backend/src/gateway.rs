//! Actuation gateway: the controller's only route to the hypervisor.

use tracing::{debug, warn};

use pricecap_core::{Allocation, MacAddr, VmName};

use crate::backend::VirtBackend;
use crate::error::{BackendError, BackendResult};

/// Outcome of pushing one epoch's caps.
#[derive(Debug, Default)]
pub struct ApplySummary {
    /// VMs whose cap was applied, with the whole-unit cap sent.
    pub applied: Vec<(VmName, u32)>,
    /// VMs whose cap could not be applied.
    pub failed: Vec<(VmName, BackendError)>,
}

impl ApplySummary {
    pub fn all_applied(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Wraps a [`VirtBackend`] and knows which domain is privileged.
///
/// The privileged (host management) domain is recognised by name rather
/// than by its position in the backend's listing.
pub struct ActuationGateway<B> {
    backend: B,
    privileged: Option<String>,
}

impl<B: VirtBackend> ActuationGateway<B> {
    pub fn new(backend: B, privileged: Option<String>) -> Self {
        Self {
            backend,
            privileged,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn privileged_domain(&self) -> Option<&str> {
        self.privileged.as_deref()
    }

    /// Running domains eligible for allocation, in backend order.
    pub async fn roster(&self) -> BackendResult<Vec<VmName>> {
        let mut domains = self.backend.list_domains().await?;
        if let Some(privileged) = &self.privileged {
            domains.retain(|d| d != privileged);
        }
        Ok(domains)
    }

    pub async fn lookup_by_mac(&self, mac: &MacAddr) -> BackendResult<VmName> {
        self.backend.lookup_by_mac(mac).await
    }

    /// Push one cap through the backend, rounded to whole units.
    pub async fn apply_cap(&self, vm: &str, cap: f64) -> BackendResult<u32> {
        let units = cap_units(cap);
        self.backend.set_capacity(vm, units).await?;
        Ok(units)
    }

    /// Push every allocation's cap. A failure for one VM is logged and
    /// does not stop the others.
    pub async fn apply(&self, allocations: &[Allocation]) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for alloc in allocations {
            match self.apply_cap(&alloc.vm, alloc.cap).await {
                Ok(units) => {
                    debug!(vm = %alloc.vm, cap = units, "cap applied");
                    summary.applied.push((alloc.vm.clone(), units));
                }
                Err(e) => {
                    warn!(vm = %alloc.vm, cap = alloc.cap, error = %e, "failed to apply cap");
                    summary.failed.push((alloc.vm.clone(), e));
                }
            }
        }
        summary
    }
}

/// Convert a fractional cap to whole units. Negative or NaN caps become 0.
fn cap_units(cap: f64) -> u32 {
    if cap.is_nan() || cap <= 0.0 {
        0
    } else {
        cap.round().min(f64::from(u32::MAX)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn alloc(vm: &str, cap: f64) -> Allocation {
        Allocation {
            vm: vm.to_string(),
            performance: 0.0,
            virtual_price: cap / 400.0,
            cap,
            new: false,
        }
    }

    #[tokio::test]
    async fn roster_excludes_privileged_by_name() {
        let backend = InMemoryBackend::with_domains(&["vmA", "dom0", "vmB"]);
        let gateway = ActuationGateway::new(backend, Some("dom0".to_string()));
        assert_eq!(gateway.roster().await.unwrap(), vec!["vmA", "vmB"]);
    }

    #[tokio::test]
    async fn roster_without_privileged_domain_keeps_everything() {
        let backend = InMemoryBackend::with_domains(&["vmA", "vmB"]);
        let gateway = ActuationGateway::new(backend, Some("Domain-0".to_string()));
        assert_eq!(gateway.roster().await.unwrap().len(), 2);

        let backend = InMemoryBackend::with_domains(&["vmA"]);
        let gateway = ActuationGateway::new(backend, None);
        assert_eq!(gateway.roster().await.unwrap(), vec!["vmA"]);
    }

    #[tokio::test]
    async fn roster_propagates_listing_failure() {
        let backend = InMemoryBackend::with_domains(&["vmA"]);
        backend.fail_listing(true);
        let gateway = ActuationGateway::new(backend, None);
        assert!(gateway.roster().await.is_err());
    }

    #[tokio::test]
    async fn apply_continues_past_failures() {
        let backend = InMemoryBackend::with_domains(&["vmA", "vmB", "vmC"]);
        backend.reject_caps_for("vmB");
        let gateway = ActuationGateway::new(backend, None);

        let summary = gateway
            .apply(&[alloc("vmA", 200.0), alloc("vmB", 100.0), alloc("vmC", 100.4)])
            .await;

        assert!(!summary.all_applied());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "vmB");
        assert_eq!(
            summary.applied,
            vec![("vmA".to_string(), 200), ("vmC".to_string(), 100)]
        );
        assert_eq!(gateway.backend().cap_of("vmC"), Some(100));
        assert_eq!(gateway.backend().cap_of("vmB"), None);
    }

    #[test]
    fn cap_units_rounding() {
        assert_eq!(cap_units(133.33), 133);
        assert_eq!(cap_units(133.5), 134);
        assert_eq!(cap_units(-3.0), 0);
        assert_eq!(cap_units(f64::NAN), 0);
    }
}
