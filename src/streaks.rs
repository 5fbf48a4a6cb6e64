use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{BuildRecord, JobIdentity};
use crate::status::Outcome;

/// How many recent builds the backward scan covers.
pub const STREAK_WINDOW: usize = 10;

/// Jobs never considered for alarming, plus any job containing "nightly".
const EXCLUDED_JOBS: [&str; 2] = ["fleet-report", "pipeline-marker"];
const EXCLUDED_SUBSTRING: &str = "nightly";

/// Consecutive-failure counts per job, recomputed from scratch each cycle.
/// Only jobs with a count above 1 survive (a single isolated failure is
/// not alarming).
pub type StreakMap = BTreeMap<JobIdentity, u32>;

/// Transition derived by diffing two successive streak maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreakSignal {
    /// The job entered the alarming set this cycle.
    Alarm { job: JobIdentity, count: u32 },
    /// The job left the alarming set this cycle.
    Recovery { job: JobIdentity },
}

fn excluded(id: &JobIdentity) -> bool {
    let name = id.bare_name();
    EXCLUDED_JOBS.contains(&name) || name.contains(EXCLUDED_SUBSTRING)
}

/// Scans the most recent builds (newest first) and counts consecutive
/// failures per job.
///
/// A job stops counting at its first observed success going backward; a
/// build that has no result for the job is skipped without resolving it.
/// Jobs whose final count is 1 or less are dropped.
pub fn compute(known_jobs: &[JobIdentity], builds: &[BuildRecord]) -> StreakMap {
    let mut unresolved: BTreeSet<&JobIdentity> =
        known_jobs.iter().filter(|id| !excluded(id)).collect();
    let mut counts: BTreeMap<&JobIdentity, u32> = BTreeMap::new();

    for build in builds.iter().take(STREAK_WINDOW) {
        if unresolved.is_empty() {
            break;
        }

        let mut resolved = Vec::new();
        for &id in &unresolved {
            match build.result_for(id).map(|sub| sub.outcome) {
                Some(Outcome::Failure) => {
                    *counts.entry(id).or_insert(0) += 1;
                }
                Some(Outcome::Success) => resolved.push(id),
                // Not run in this build, or a non-terminal/neutral result:
                // neither counts nor resolves.
                _ => {}
            }
        }
        for id in resolved {
            unresolved.remove(id);
        }
    }

    counts
        .into_iter()
        .filter(|&(_, count)| count > 1)
        .map(|(id, count)| (id.clone(), count))
        .collect()
}

/// Diffs two successive streak maps into notification signals.
///
/// The very first computation has no previous map and fires nothing. A job
/// fires at most one signal per transition, never both in one cycle.
pub fn diff(previous: Option<&StreakMap>, current: &StreakMap) -> Vec<StreakSignal> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut signals = Vec::new();
    for job in previous.keys() {
        if !current.contains_key(job) {
            signals.push(StreakSignal::Recovery { job: job.clone() });
        }
    }
    for (job, &count) in current {
        if !previous.contains_key(job) {
            signals.push(StreakSignal::Alarm {
                job: job.clone(),
                count,
            });
        }
    }
    signals
}
