//! In-memory backend that records every call.
//!
//! Used by tests in place of a hypervisor. Domains, their hardware
//! addresses, and injected failures are configured up front; applied caps
//! can be inspected afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use pricecap_core::{MacAddr, VmName};

use crate::backend::{vcpus_for_cap, VirtBackend};
use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone)]
struct Domain {
    name: VmName,
    mac: Option<MacAddr>,
}

/// Recording backend with scriptable failures.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    domains: RwLock<Vec<Domain>>,
    /// name → (vcpus, cap) as last applied.
    applied: RwLock<HashMap<VmName, (u32, u32)>>,
    rejecting: RwLock<HashSet<VmName>>,
    listing_fails: AtomicBool,
    lookups: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend from domain names, without hardware addresses.
    pub fn with_domains<S: AsRef<str>>(names: &[S]) -> Self {
        let backend = Self::new();
        for name in names {
            backend.add_domain(name.as_ref(), None);
        }
        backend
    }

    /// Append a running domain.
    pub fn add_domain(&self, name: &str, mac: Option<MacAddr>) {
        self.domains.write().expect("domains lock").push(Domain {
            name: name.to_string(),
            mac,
        });
    }

    /// Remove a domain, as if it had been shut down.
    pub fn remove_domain(&self, name: &str) {
        self.domains
            .write()
            .expect("domains lock")
            .retain(|d| d.name != name);
    }

    /// Make `set_capacity` fail for `name`.
    pub fn reject_caps_for(&self, name: &str) {
        self.rejecting
            .write()
            .expect("rejecting lock")
            .insert(name.to_string());
    }

    /// Make `list_domains` fail until reset.
    pub fn fail_listing(&self, fail: bool) {
        self.listing_fails.store(fail, Ordering::Relaxed);
    }

    /// Last cap applied to `name`.
    pub fn cap_of(&self, name: &str) -> Option<u32> {
        self.applied
            .read()
            .expect("applied lock")
            .get(name)
            .map(|(_, cap)| *cap)
    }

    /// Last vCPU count applied to `name`.
    pub fn vcpus_of(&self, name: &str) -> Option<u32> {
        self.applied
            .read()
            .expect("applied lock")
            .get(name)
            .map(|(vcpus, _)| *vcpus)
    }

    /// Number of domains that have received a cap.
    pub fn capped_count(&self) -> usize {
        self.applied.read().expect("applied lock").len()
    }

    /// Number of `lookup_by_mac` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VirtBackend for InMemoryBackend {
    async fn list_domains(&self) -> BackendResult<Vec<VmName>> {
        if self.listing_fails.load(Ordering::Relaxed) {
            return Err(BackendError::CommandFailed {
                command: "list".to_string(),
                status: "injected".to_string(),
                stderr: "listing disabled".to_string(),
            });
        }
        let domains = self.domains.read().expect("domains lock");
        Ok(domains.iter().map(|d| d.name.clone()).collect())
    }

    async fn lookup_by_mac(&self, mac: &MacAddr) -> BackendResult<VmName> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let domains = self.domains.read().expect("domains lock");
        domains
            .iter()
            .find(|d| d.mac.as_ref() == Some(mac))
            .map(|d| d.name.clone())
            .ok_or(BackendError::NoDomainWithMac(*mac))
    }

    async fn set_capacity(&self, name: &str, cap: u32) -> BackendResult<()> {
        let known = self
            .domains
            .read()
            .expect("domains lock")
            .iter()
            .any(|d| d.name == name);
        if !known {
            return Err(BackendError::DomainNotFound(name.to_string()));
        }
        if self.rejecting.read().expect("rejecting lock").contains(name) {
            return Err(BackendError::Rejected {
                domain: name.to_string(),
                param: format!("cap={cap}"),
                reason: "injected".to_string(),
            });
        }
        self.applied
            .write()
            .expect("applied lock")
            .insert(name.to_string(), (vcpus_for_cap(cap), cap));
        Ok(())
    }

    async fn scheduler_params(&self, name: &str) -> BackendResult<Vec<(String, String)>> {
        let applied = self.applied.read().expect("applied lock");
        let (vcpus, cap) = applied
            .get(name)
            .copied()
            .ok_or_else(|| BackendError::DomainNotFound(name.to_string()))?;
        Ok(vec![
            ("vcpus".to_string(), vcpus.to_string()),
            ("cap".to_string(), cap.to_string()),
        ])
    }
}
