//! Shared types used across pricecap crates.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name of a VM as assigned by the virtualization backend.
pub type VmName = String;

/// Lower bound of a reported performance value.
pub const PERFORMANCE_MIN: f64 = -1.0;

/// Upper bound of a reported performance value.
pub const PERFORMANCE_MAX: f64 = 1.0;

/// Capacity units granted per physical CPU.
pub const UNITS_PER_CPU: u32 = 100;

/// Saturate a performance value into `[-1.0, 1.0]`.
///
/// Values already in range are returned unchanged. NaN is passed through;
/// callers reject it before it reaches the performance map.
pub fn clamp_performance(value: f64) -> f64 {
    value.clamp(PERFORMANCE_MIN, PERFORMANCE_MAX)
}

// ── Hardware address ───────────────────────────────────────────────

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-zero address the kernel reports for incomplete neighbours.
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Error returned when a hardware address string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hardware address: {0}")]
pub struct ParseMacError(pub String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.is_empty() || part.len() > 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(MacAddr(bytes))
    }
}

// ── Performance map ────────────────────────────────────────────────

/// Latest performance report per VM for the current control epoch.
///
/// A VM missing from the map counts as `0.0` in aggregate sums but is not
/// considered to have reported.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMap {
    reports: HashMap<VmName, f64>,
}

impl PerformanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report, replacing any earlier report from the same VM
    /// in this epoch. The value is clamped into `[-1.0, 1.0]`.
    pub fn record(&mut self, vm: &str, value: f64) -> f64 {
        let clamped = clamp_performance(value);
        self.reports.insert(vm.to_string(), clamped);
        clamped
    }

    /// Reported value for `vm`, or `0.0` when it has not reported.
    pub fn get(&self, vm: &str) -> f64 {
        self.reports.get(vm).copied().unwrap_or(0.0)
    }

    pub fn has_reported(&self, vm: &str) -> bool {
        self.reports.contains_key(vm)
    }

    /// Sum of reports over `roster`; absent VMs contribute `0.0`.
    pub fn sum_over<S: AsRef<str>>(&self, roster: &[S]) -> f64 {
        roster.iter().map(|vm| self.get(vm.as_ref())).sum()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Drop all reports at the start of a new epoch.
    pub fn clear(&mut self) {
        self.reports.clear();
    }
}

// ── Allocation ─────────────────────────────────────────────────────

/// The outcome of one epoch for a single VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub vm: VmName,
    /// Performance used for this epoch (`0.0` when unreported).
    pub performance: f64,
    /// Normalized share after renormalization.
    pub virtual_price: f64,
    /// Absolute capacity in units of 1/100 CPU.
    pub cap: f64,
    /// Whether the VM was first seen in this epoch.
    pub new: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_in_range_values() {
        for v in [-1.0, -0.5, 0.0, 0.25, 1.0] {
            assert_eq!(clamp_performance(v), v);
        }
    }

    #[test]
    fn clamp_saturates_out_of_range_values() {
        assert_eq!(clamp_performance(3.7), 1.0);
        assert_eq!(clamp_performance(-42.0), -1.0);
        assert_eq!(clamp_performance(f64::INFINITY), 1.0);
        assert_eq!(clamp_performance(f64::NEG_INFINITY), -1.0);
    }

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "52:54:00:AB:cd:0f".parse().unwrap();
        assert_eq!(mac.0, [0x52, 0x54, 0x00, 0xab, 0xcd, 0x0f]);
        assert_eq!(mac.to_string(), "52:54:00:ab:cd:0f");
    }

    #[test]
    fn mac_parse_rejects_malformed() {
        assert!("52:54:00:ab:cd".parse::<MacAddr>().is_err());
        assert!("52:54:00:ab:cd:0f:11".parse::<MacAddr>().is_err());
        assert!("52:54:00:ab:cd:zz".parse::<MacAddr>().is_err());
        assert!("525:4:00:ab:cd:0f".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn performance_map_latest_report_wins() {
        let mut perf = PerformanceMap::new();
        perf.record("vmA", -0.2);
        perf.record("vmA", 0.3);
        assert_eq!(perf.get("vmA"), 0.3);
        assert_eq!(perf.len(), 1);
    }

    #[test]
    fn performance_map_absent_vm_is_neutral() {
        let mut perf = PerformanceMap::new();
        perf.record("vmA", -0.4);
        assert_eq!(perf.get("vmB"), 0.0);
        assert!(!perf.has_reported("vmB"));
        assert_eq!(perf.sum_over(&["vmA", "vmB"]), -0.4);
    }

    #[test]
    fn performance_map_clamps_and_clears() {
        let mut perf = PerformanceMap::new();
        assert_eq!(perf.record("vmA", 5.0), 1.0);
        perf.clear();
        assert!(perf.is_empty());
        assert!(!perf.has_reported("vmA"));
    }
}
