use std::collections::HashMap;

use indexmap::IndexMap;

use crate::model::{JobIdentity, SubResult};
use crate::naming::{classify_node, normalize};
use crate::status::classify;

/// URL fragment marking leaves that belong to the distinguishable
/// sub-project; their columns get a disambiguating prefix.
pub const SUBPROJECT_URL_MARKER: &str = "/job/helios-site/";
const SUBPROJECT_COLUMN_PREFIX: &str = "site/";

/// One node of a raw nested build record.
///
/// Container nodes carry only children and never appear in the flattened
/// output; every other node is a leaf result.
#[derive(Debug, Clone)]
pub enum BuildNode {
    Container { children: Vec<BuildNode> },
    Leaf(LeafBuild),
}

#[derive(Debug, Clone)]
pub struct LeafBuild {
    pub job_name: String,
    pub url: String,
    pub result: Option<String>,
    pub duration_ms: u64,
}

/// Externally-reported result for one job on one commit.
#[derive(Debug, Clone)]
pub struct ExternalCheck {
    pub status: Option<String>,
    pub url: String,
    pub duration_ms: Option<u64>,
}

/// Flattens a raw nested build tree into one mapping from job identity to
/// its terminal sub-result.
///
/// Depth-first; each leaf appears exactly once, containers never do.
pub fn flatten(nodes: &[BuildNode]) -> IndexMap<JobIdentity, SubResult> {
    let mut out = IndexMap::new();
    for node in nodes {
        flatten_into(node, &mut out);
    }
    out
}

fn flatten_into(node: &BuildNode, out: &mut IndexMap<JobIdentity, SubResult>) {
    match node {
        BuildNode::Container { children } => {
            for child in children {
                flatten_into(child, out);
            }
        }
        BuildNode::Leaf(leaf) => {
            let mut name = normalize(&leaf.job_name);
            if leaf.url.contains(SUBPROJECT_URL_MARKER) {
                name = format!("{SUBPROJECT_COLUMN_PREFIX}{name}");
            }
            let identity = JobIdentity::primary(name);
            out.insert(
                identity,
                SubResult {
                    outcome: classify(leaf.result.as_deref()),
                    duration_ms: leaf.duration_ms,
                    url: leaf.url.clone(),
                    node: Some(classify_node(&leaf.job_name)),
                },
            );
        }
    }
}

/// Merges externally-reported per-commit checks into a flattened job map.
///
/// A check whose bare name is already present (reported by the primary
/// system) is left alone; everything else is inserted under an
/// origin-prefixed identity.
pub fn merge_external(
    jobs: &mut IndexMap<JobIdentity, SubResult>,
    checks: &HashMap<String, ExternalCheck>,
) {
    for (name, check) in checks {
        let already_known = jobs
            .keys()
            .any(|id| id.bare_name() == name.as_str());
        if already_known {
            continue;
        }
        jobs.insert(
            JobIdentity::external(name),
            SubResult {
                outcome: classify(check.status.as_deref()),
                duration_ms: check.duration_ms.unwrap_or(0),
                url: check.url.clone(),
                node: None,
            },
        );
    }
}
