use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{BuildRecord, Machine};
use crate::naming::NodeClass;

const MS_PER_HOUR: u64 = 3_600_000;
const HOURS_PER_MONTH: u64 = 24 * 30;

/// Hourly compute rates in cents per node class. Unknown has no rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateTable {
    pub linux_cpu: u64,
    pub linux_gpu: u64,
    pub linux_bigcpu: u64,
    pub linux_multigpu: u64,
    pub rocm: u64,
    pub win_cpu: u64,
    pub win_gpu: u64,
    pub osx: u64,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            linux_cpu: 17,
            linux_gpu: 90,
            linux_bigcpu: 34,
            linux_multigpu: 312,
            rocm: 164,
            win_cpu: 44,
            win_gpu: 114,
            osx: 104,
        }
    }
}

impl RateTable {
    pub fn cents_per_hour(&self, node: NodeClass) -> Option<u64> {
        match node {
            NodeClass::LinuxCpu => Some(self.linux_cpu),
            NodeClass::LinuxGpu => Some(self.linux_gpu),
            NodeClass::LinuxBigcpu => Some(self.linux_bigcpu),
            NodeClass::LinuxMultigpu => Some(self.linux_multigpu),
            NodeClass::Rocm => Some(self.rocm),
            NodeClass::WinCpu => Some(self.win_cpu),
            NodeClass::WinGpu => Some(self.win_gpu),
            NodeClass::Osx => Some(self.osx),
            NodeClass::Unknown => None,
        }
    }
}

/// A monetary estimate in cents.
///
/// `AtLeast` marks totals where at least one contributor had an unknown
/// node class or a still-running job; it renders as "amount or more",
/// never as a precise number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cost {
    Exact(u64),
    AtLeast(u64),
}

impl Cost {
    pub fn cents(self) -> u64 {
        match self {
            Cost::Exact(c) | Cost::AtLeast(c) => c,
        }
    }

    pub fn is_indeterminate(self) -> bool {
        matches!(self, Cost::AtLeast(_))
    }

    pub fn add(self, other: Cost) -> Cost {
        match (self, other) {
            (Cost::Exact(a), Cost::Exact(b)) => Cost::Exact(a + b),
            (a, b) => Cost::AtLeast(a.cents() + b.cents()),
        }
    }
}

impl std::fmt::Display for Cost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cents = self.cents();
        let marker = if self.is_indeterminate() { "+" } else { "" };
        write!(f, "${}.{:02}{}", cents / 100, cents % 100, marker)
    }
}

impl std::iter::Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost::Exact(0), Cost::add)
    }
}

/// Estimates the cost of one execution, rounded up to a whole cent.
///
/// An unknown node class yields the indeterminate marker, never zero.
pub fn estimate(rates: &RateTable, duration_ms: u64, node: NodeClass) -> Cost {
    match rates.cents_per_hour(node) {
        Some(rate) => Cost::Exact((rate * duration_ms).div_ceil(MS_PER_HOUR)),
        None => Cost::AtLeast(0),
    }
}

/// Sums the cost of every job in a build.
///
/// Jobs still pending contribute a lower bound only, so the build total is
/// indeterminate until everything has finished.
pub fn build_cost(rates: &RateTable, build: &BuildRecord) -> Cost {
    build
        .jobs
        .values()
        .map(|sub| {
            let cost = estimate(rates, sub.duration_ms, sub.node.unwrap_or(NodeClass::Unknown));
            if sub.outcome.is_terminal() {
                cost
            } else {
                Cost::AtLeast(cost.cents())
            }
        })
        .sum()
}

/// Busy/idle machine counts and rate for one node class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassUtilization {
    pub busy: usize,
    pub idle: usize,
    pub hourly_cents: Option<u64>,
}

/// Fleet-wide cost aggregation over the current machine pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetCost {
    pub per_class: BTreeMap<String, ClassUtilization>,
    pub hourly: Cost,
    pub monthly: Cost,
}

/// Aggregates busy/idle counts per node class and projects hourly and
/// monthly spend. Offline machines cost nothing and take no work, so they
/// are excluded entirely.
pub fn fleet_cost(rates: &RateTable, machines: &[Machine]) -> FleetCost {
    let mut per_class: BTreeMap<String, ClassUtilization> = BTreeMap::new();
    let mut hourly = Cost::Exact(0);

    for machine in machines {
        if machine.offline {
            continue;
        }
        let class = machine.node_class();
        let entry = per_class
            .entry(class.as_str().to_string())
            .or_insert_with(|| ClassUtilization {
                busy: 0,
                idle: 0,
                hourly_cents: rates.cents_per_hour(class),
            });
        if machine.busy {
            entry.busy += 1;
        } else {
            entry.idle += 1;
        }

        hourly = hourly.add(match rates.cents_per_hour(class) {
            Some(rate) => Cost::Exact(rate),
            None => Cost::AtLeast(0),
        });
    }

    let monthly = match hourly {
        Cost::Exact(c) => Cost::Exact(c * HOURS_PER_MONTH),
        Cost::AtLeast(c) => Cost::AtLeast(c * HOURS_PER_MONTH),
    };

    FleetCost {
        per_class,
        hourly,
        monthly,
    }
}
