//! pricecap-allocator: game-theoretic sharing of CPU capacity.
//!
//! Each VM holds a persistent *virtual price* `vp`, its normalized share
//! of the platform. Once per control epoch the prices are moved by the
//! VMs' own performance reports and converted into absolute caps.
//!
//! # Price Adaptation
//!
//! ```text
//! S = Σ perf[vm]                           (unreported VMs count as 0)
//!
//! for vm in roster:
//!     if vp[vm] == 0:          new VM, priced below
//!     elif perf[vm] < 0:       vp[vm] -= ε · (perf[vm] − vp[vm] · S)
//!
//! new VMs:        vp = 1 / N
//! incumbents:     vp *= (N − N_new) / N
//! clamp:          vp ∈ [0.125, 1.0]
//! renormalize:    vp /= Σ vp
//! cap[vm] = vp[vm] · platform_size
//! ```
//!
//! Only underperforming VMs move their own price; everybody else's share
//! changes through renormalization alone.

pub mod allocator;
pub mod price;

pub use allocator::{Allocator, EpochReport};
pub use price::{PriceBook, MAX_PRICE, MIN_PRICE};
