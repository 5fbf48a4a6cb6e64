use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Relative difference against the baseline at which a benchmark is
/// considered regressed (or, negated, optimized).
pub const REGRESSION_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Optimized,
    Regressed,
    Stable,
}

/// Classifies a relative difference against the fixed baseline.
pub fn classify_diff(diff: f64) -> Verdict {
    if diff >= REGRESSION_THRESHOLD {
        Verdict::Regressed
    } else if diff <= -REGRESSION_THRESHOLD {
        Verdict::Optimized
    } else {
        Verdict::Stable
    }
}

/// One benchmark's result within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchCell {
    pub mean: f64,
    /// `(mean - baseline_mean) / baseline_mean`
    pub diff: f64,
    pub verdict: Verdict,
}

/// One ingested benchmark run. A benchmark absent from `cells` has no data
/// for this run; it is not a zero or a Stable result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchRun {
    pub label: String,
    pub cells: BTreeMap<String, BenchCell>,
}

/// An ordered series of benchmark runs compared against a fixed baseline.
///
/// The chronologically first ingested run is the baseline for the series'
/// entire life; it is never rebased as later runs arrive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkSeries {
    baseline: BTreeMap<String, f64>,
    runs: Vec<BenchRun>,
}

impl BenchmarkSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests one run's `benchmark name -> mean` map, oldest first.
    ///
    /// The first call fixes the baseline. Later calls produce a cell for
    /// each benchmark present in both the baseline and the run.
    pub fn ingest(&mut self, label: impl Into<String>, means: &BTreeMap<String, f64>) {
        let label = label.into();

        if self.runs.is_empty() {
            self.baseline = means.clone();
            let cells = means
                .iter()
                .map(|(name, &mean)| {
                    (
                        name.clone(),
                        BenchCell {
                            mean,
                            diff: 0.0,
                            verdict: Verdict::Stable,
                        },
                    )
                })
                .collect();
            self.runs.push(BenchRun { label, cells });
            return;
        }

        let mut cells = BTreeMap::new();
        for (name, &baseline_mean) in &self.baseline {
            let Some(&mean) = means.get(name) else {
                continue;
            };
            let diff = (mean - baseline_mean) / baseline_mean;
            cells.insert(
                name.clone(),
                BenchCell {
                    mean,
                    diff,
                    verdict: classify_diff(diff),
                },
            );
        }
        self.runs.push(BenchRun { label, cells });
    }

    pub fn runs(&self) -> &[BenchRun] {
        &self.runs
    }

    /// Benchmarks eligible for cells, i.e. those present in the baseline.
    pub fn benchmark_names(&self) -> impl Iterator<Item = &str> {
        self.baseline.keys().map(String::as_str)
    }

    pub fn baseline_label(&self) -> Option<&str> {
        self.runs.first().map(|run| run.label.as_str())
    }
}
