//! pricecap-backend: the actuation gateway.
//!
//! Enumerates running domains, maps a hardware address to a domain, and
//! pushes CPU caps. The hypervisor is reached through the [`VirtBackend`]
//! trait; [`VirshBackend`] drives libvirt's `virsh` tool and
//! [`InMemoryBackend`] records calls for tests.
//!
//! # Architecture
//!
//! ```text
//! ActuationGateway
//!   ├── roster()        → list_domains() minus the privileged domain
//!   ├── lookup_by_mac() → domain owning a hardware address
//!   └── apply()         → set_capacity() per allocation, failures collected
//! ```
//!
//! A cap of `N` units sets `ceil(N / 100)` active vCPUs and a scheduler
//! cap of `N` percent.

pub mod backend;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod virsh;

pub use backend::{vcpus_for_cap, VirtBackend};
pub use error::{BackendError, BackendResult};
pub use gateway::{ActuationGateway, ApplySummary};
pub use memory::InMemoryBackend;
pub use virsh::VirshBackend;
