//! Persistent virtual prices.

use std::collections::HashMap;

use pricecap_core::VmName;

/// Smallest share a VM is clamped to before renormalization.
pub const MIN_PRICE: f64 = 0.125;

/// Largest share a VM is clamped to before renormalization.
pub const MAX_PRICE: f64 = 1.0;

/// Virtual price per VM, kept for the lifetime of the process.
///
/// A price of `0.0` means the VM has never been allocated. Entries are
/// never removed: a VM that leaves the roster keeps its last price and
/// picks it up again if it comes back.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    prices: HashMap<VmName, f64>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current price of `vm`, `0.0` if unseen.
    pub fn price(&self, vm: &str) -> f64 {
        self.prices.get(vm).copied().unwrap_or(0.0)
    }

    pub fn is_known(&self, vm: &str) -> bool {
        self.price(vm) != 0.0
    }

    pub fn set(&mut self, vm: &str, price: f64) {
        self.prices.insert(vm.to_string(), price);
    }

    pub(crate) fn get_mut(&mut self, vm: &str) -> &mut f64 {
        self.prices.entry(vm.to_string()).or_insert(0.0)
    }

    /// Sum of prices over `roster` only.
    pub fn sum_over<S: AsRef<str>>(&self, roster: &[S]) -> f64 {
        roster.iter().map(|vm| self.price(vm.as_ref())).sum()
    }

    /// Number of VMs ever priced.
    pub fn len(&self) -> usize {
        self.prices.values().filter(|p| **p != 0.0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
