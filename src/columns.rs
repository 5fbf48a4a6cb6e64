use std::collections::BTreeSet;

use crate::model::{BuildRecord, JobIdentity, Origin, ViewMode};

/// Binary/smoke tests known to run on every pull request; visible in the
/// default view, so the binary view hides them.
const BINARY_PR_ALLOWLIST: [&str; 2] = ["binary-linux-cpu", "smoke-linux-gpu"];

/// Whether a job is a binary or smoke-test job.
pub fn is_binary_job(name: &str) -> bool {
    name.starts_with("binary-") || name.starts_with("smoke-")
}

fn on_pr_allowlist(name: &str) -> bool {
    BINARY_PR_ALLOWLIST.contains(&name)
}

/// Derives the ordered set of job columns for a build-history view.
///
/// Collects every identity seen in any build, applies the mode-dependent
/// inclusion rules and returns them sorted lexicographically with no
/// duplicates.
pub fn known_job_set(builds: &[BuildRecord], mode: ViewMode) -> Vec<JobIdentity> {
    let mut set = BTreeSet::new();

    for build in builds {
        for id in build.jobs.keys() {
            if include(id, mode) {
                set.insert(id.clone());
            }
        }
    }

    set.into_iter().collect()
}

fn include(id: &JobIdentity, mode: ViewMode) -> bool {
    let name = id.bare_name();
    match (id.origin(), mode) {
        (Origin::Primary, ViewMode::Default) => true,
        (Origin::Primary, ViewMode::Binary) => is_binary_job(name),
        (Origin::External, ViewMode::Default) => !is_binary_job(name) || on_pr_allowlist(name),
        (Origin::External, ViewMode::Binary) => is_binary_job(name) && !on_pr_allowlist(name),
    }
}
