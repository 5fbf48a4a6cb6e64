use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::naming::NodeClass;
use crate::status::Outcome;

/// Prefix applied to externally-reported jobs that are not already known to
/// the primary build system, so UI columns never silently collide.
pub const EXTERNAL_PREFIX: &str = "gh/";

/// Which system reported a job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The primary build system (nested multi-job build trees).
    Primary,
    /// Externally-hosted CI reporting per-commit statuses.
    External,
}

/// Canonical, origin-disambiguated name for a job column.
///
/// Ordering and equality are driven by the key string, so a sorted set of
/// identities is the display column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobIdentity {
    key: String,
    origin: Origin,
}

// Serialized as the bare key string so identities work as JSON map keys;
// the origin is recoverable from the external prefix.
impl Serialize for JobIdentity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl<'de> Deserialize<'de> for JobIdentity {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        let origin = if key.starts_with(EXTERNAL_PREFIX) {
            Origin::External
        } else {
            Origin::Primary
        };
        Ok(Self { key, origin })
    }
}

impl JobIdentity {
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            key: name.into(),
            origin: Origin::Primary,
        }
    }

    pub fn external(name: &str) -> Self {
        Self {
            key: format!("{EXTERNAL_PREFIX}{name}"),
            origin: Origin::External,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The name without the external-origin prefix.
    pub fn bare_name(&self) -> &str {
        self.key.strip_prefix(EXTERNAL_PREFIX).unwrap_or(&self.key)
    }
}

impl std::fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Terminal result of one job within one build. Owned by its parent
/// [`BuildRecord`], never shared between builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubResult {
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub url: String,
    pub node: Option<NodeClass>,
}

/// What caused a build to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    ManualRebuild,
    PullRequest,
    Push,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
    pub author: Option<String>,
}

impl CommitInfo {
    /// First line of the commit message, for grid cells.
    pub fn short_message(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// One historical build execution with its flattened per-job results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub number: u64,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub trigger: TriggerKind,
    pub commits: Vec<CommitInfo>,
    pub jobs: IndexMap<JobIdentity, SubResult>,
}

impl BuildRecord {
    pub fn result_for(&self, id: &JobIdentity) -> Option<&SubResult> {
        self.jobs.get(id)
    }
}

/// Column-filtering mode for a build-history view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Default,
    /// Surfaces binary/smoke-test columns not already visible by default.
    Binary,
}

/// One pending entry in the build queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub task: String,
    pub reason: String,
}

/// One executor/machine in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub name: String,
    pub busy: bool,
    pub offline: bool,
}

impl Machine {
    pub fn node_class(&self) -> NodeClass {
        crate::naming::classify_node(&self.name)
    }
}
