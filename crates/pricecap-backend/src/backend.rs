//! Virtualization backend abstraction.

use async_trait::async_trait;

use pricecap_core::{MacAddr, VmName, UNITS_PER_CPU};

use crate::error::BackendResult;

/// Operations the controller needs from the hypervisor.
///
/// Implementations are only ever driven from the control loop, one call
/// at a time.
#[async_trait]
pub trait VirtBackend: Send + Sync {
    /// Names of running domains, in the order the hypervisor reports them.
    async fn list_domains(&self) -> BackendResult<Vec<VmName>>;

    /// Domain whose primary network interface carries `mac`.
    async fn lookup_by_mac(&self, mac: &MacAddr) -> BackendResult<VmName>;

    /// Set the active vCPU count and the scheduler cap of `name`.
    ///
    /// `cap` is in units of 1/100 CPU.
    async fn set_capacity(&self, name: &str, cap: u32) -> BackendResult<()>;

    /// Current scheduler parameters of `name` as `(field, value)` pairs.
    async fn scheduler_params(&self, name: &str) -> BackendResult<Vec<(String, String)>>;
}

/// Number of vCPUs needed to honour `cap`; never less than one.
pub fn vcpus_for_cap(cap: u32) -> u32 {
    cap.div_ceil(UNITS_PER_CPU).max(1)
}
