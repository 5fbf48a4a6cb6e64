use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::status::Outcome;

/// Whether an outcome counts as non-passing for correlation purposes.
///
/// Inputs here arrive pre-classified from short per-commit status strings,
/// so the passing set is {Success, Skipped, Pending} rather than the full
/// outcome enum.
fn non_passing(outcome: Outcome) -> bool {
    !matches!(
        outcome,
        Outcome::Success | Outcome::Skipped | Outcome::Pending
    )
}

/// Dense co-occurrence matrix of jobs failing together across history.
///
/// `jobs` is sorted; `counts[i][j]` is how many commits saw both `jobs[i]`
/// and `jobs[j]` non-passing. Symmetric, self-pairs included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub jobs: Vec<String>,
    pub counts: Vec<Vec<u32>>,
}

impl CorrelationMatrix {
    pub fn count(&self, a: &str, b: &str) -> u32 {
        let (Some(i), Some(j)) = (self.index_of(a), self.index_of(b)) else {
            return 0;
        };
        self.counts[i][j]
    }

    fn index_of(&self, job: &str) -> Option<usize> {
        self.jobs.binary_search_by(|j| j.as_str().cmp(job)).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Builds the failure co-occurrence matrix over per-commit job results.
///
/// A commit whose fetch failed entirely is `None` and contributes zero
/// pairs; it never aborts the rest of the computation.
pub fn build_matrix(commits: &[Option<HashMap<String, Outcome>>]) -> CorrelationMatrix {
    let mut failing_jobs: BTreeSet<&str> = BTreeSet::new();
    for commit in commits.iter().flatten() {
        for (job, &outcome) in commit {
            if non_passing(outcome) {
                failing_jobs.insert(job);
            }
        }
    }

    let jobs: Vec<String> = failing_jobs.iter().map(|j| (*j).to_string()).collect();
    let index: HashMap<&str, usize> = jobs
        .iter()
        .enumerate()
        .map(|(i, job)| (job.as_str(), i))
        .collect();

    let mut counts = vec![vec![0u32; jobs.len()]; jobs.len()];
    for commit in commits.iter().flatten() {
        let failed: Vec<usize> = commit
            .iter()
            .filter(|&(_, &outcome)| non_passing(outcome))
            .map(|(job, _)| index[job.as_str()])
            .collect();

        for &i in &failed {
            for &j in &failed {
                counts[i][j] += 1;
            }
        }
    }

    CorrelationMatrix { jobs, counts }
}
