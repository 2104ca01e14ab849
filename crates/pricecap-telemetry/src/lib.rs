//! pricecap-telemetry: inbound performance reports.
//!
//! Each datagram carries one ASCII decimal performance value. The sender's
//! address is resolved to a VM name (cache first, then the kernel
//! address-resolution table plus a backend lookup) and the clamped value
//! is stored in the epoch's [`PerformanceMap`](pricecap_core::PerformanceMap).
//!
//! ```text
//! TelemetryListener::ingest(payload, sender)
//!   ├── parse_report(payload)          → f64 (rejects empty / non-numeric / NaN)
//!   ├── IdentityResolver::resolve(sender)
//!   │     ├── cache hit                → VM name
//!   │     └── miss → ArpTable → MacAddr → gateway.lookup_by_mac() → cache insert
//!   └── performance.record(vm, value)  → clamped into [-1, 1]
//! ```

pub mod arp;
pub mod error;
pub mod identity;
pub mod listener;

pub use arp::{AddressResolver, ArpTable};
pub use error::{TelemetryError, TelemetryResult};
pub use identity::{CacheStats, IdentityResolver};
pub use listener::{parse_report, TelemetryListener};
