//! Allocator: one price-adaptation epoch.
//!
//! [`Allocator::rebalance`] is the pure algorithm over a roster, the
//! epoch's performance map and the price book. [`Allocator::run_epoch`]
//! wraps it with the roster fetch and cap application through the
//! actuation gateway.

use std::collections::HashSet;

use tracing::{debug, info};

use pricecap_backend::{ActuationGateway, ApplySummary, BackendResult, VirtBackend};
use pricecap_core::{Allocation, ControllerConfig, PerformanceMap, VmName};

use crate::price::{PriceBook, MAX_PRICE, MIN_PRICE};

/// What happened during one epoch.
#[derive(Debug, Default)]
pub struct EpochReport {
    pub allocations: Vec<Allocation>,
    pub summary: ApplySummary,
    /// Roster VMs that reported during the epoch.
    pub reported: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocator {
    epsilon: f64,
    platform_size: f64,
}

impl Allocator {
    pub fn new(epsilon: f64, platform_size: f64) -> Self {
        Self {
            epsilon,
            platform_size,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.epsilon, config.platform_size())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn platform_size(&self) -> f64 {
        self.platform_size
    }

    /// Gradient step for an underperforming VM.
    ///
    /// `sum_perf` is the aggregate performance of the whole roster.
    pub fn price_step(&self, vp: f64, perf: f64, sum_perf: f64) -> f64 {
        vp - self.epsilon * (perf - vp * sum_perf)
    }

    /// Recompute prices for `roster` and return the resulting allocations,
    /// in roster order.
    ///
    /// `roster` must already exclude the privileged domain. An empty
    /// roster leaves the price book untouched.
    pub fn rebalance(
        &self,
        roster: &[VmName],
        perf: &PerformanceMap,
        prices: &mut PriceBook,
    ) -> Vec<Allocation> {
        if roster.is_empty() {
            return Vec::new();
        }

        let sum_perf = perf.sum_over(roster);

        let mut new_vms: HashSet<&str> = HashSet::new();
        for vm in roster {
            let vp = prices.get_mut(vm);
            if *vp == 0.0 {
                debug!(%vm, "new vm");
                new_vms.insert(vm.as_str());
            } else if perf.get(vm) < 0.0 {
                *vp = self.price_step(*vp, perf.get(vm), sum_perf);
            }
        }

        // Make room for newcomers by diluting incumbents proportionally.
        let n = roster.len() as f64;
        let dilution = (n - new_vms.len() as f64) / n;
        for vm in roster {
            let vp = prices.get_mut(vm);
            if new_vms.contains(vm.as_str()) {
                *vp = 1.0 / n;
            } else {
                *vp *= dilution;
            }
            *vp = vp.clamp(MIN_PRICE, MAX_PRICE);
        }

        // Non-empty roster and the clamp floor keep the sum positive.
        let sum_vp = prices.sum_over(roster);
        roster
            .iter()
            .map(|vm| {
                let vp = prices.get_mut(vm);
                *vp /= sum_vp;
                Allocation {
                    vm: vm.clone(),
                    performance: perf.get(vm),
                    virtual_price: *vp,
                    cap: *vp * self.platform_size,
                    new: new_vms.contains(vm.as_str()),
                }
            })
            .collect()
    }

    /// Run a full epoch: fetch the roster, rebalance, push caps.
    ///
    /// A roster failure aborts the epoch with prices untouched. Cap
    /// failures are collected in the report.
    pub async fn run_epoch<B: VirtBackend>(
        &self,
        gateway: &ActuationGateway<B>,
        perf: &PerformanceMap,
        prices: &mut PriceBook,
    ) -> BackendResult<EpochReport> {
        let roster = gateway.roster().await?;
        let reported = roster.iter().filter(|vm| perf.has_reported(vm)).count();

        let allocations = self.rebalance(&roster, perf, prices);
        for a in &allocations {
            info!(
                vm = %a.vm,
                perf = a.performance,
                vp = a.virtual_price,
                cap = a.cap,
                new = a.new,
                "allocation"
            );
        }

        let summary = gateway.apply(&allocations).await;
        Ok(EpochReport {
            allocations,
            summary,
            reported,
        })
    }
}
