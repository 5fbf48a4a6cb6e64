use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{CiPulseError, Result};
use crate::flatten::{self, BuildNode, LeafBuild};
use crate::model::{BuildRecord, CommitInfo, Machine, QueueEntry, TriggerKind};

use super::{get_json, get_with_retry};

/// Type tag marking a nested multi-job container build.
const MULTIJOB_MARKER: &str = "com.tikal.jenkins.plugins.multijob.MultiJobBuild";

/// Tree query requesting everything one refresh needs in a single
/// document, nested sub-builds bounded at three levels. Pagination is
/// deliberately absent: the upstream service materializes full result sets
/// regardless of page bounds.
const SUB_BUILD_FIELDS: &str = "jobName,url,result,duration,buildNumber";
fn tree_query(limit: usize) -> String {
    format!(
        "builds[number,url,duration,timestamp,result,\
         actions[causes[_class,shortDescription],parameters[name,value]],\
         changeSet[items[commitId,msg,authorEmail]],\
         subBuilds[{SUB_BUILD_FIELDS},build[_class,subBuilds[{SUB_BUILD_FIELDS},\
         build[_class,subBuilds[{SUB_BUILD_FIELDS}]]]]]]{{0,{limit}}}"
    )
}

#[derive(Debug, Deserialize)]
struct BuildsResponse {
    #[serde(default)]
    builds: Vec<RawBuild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBuild {
    pub number: u64,
    pub url: String,
    #[serde(default)]
    pub duration: u64,
    pub timestamp: i64,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default, rename = "changeSet")]
    change_set: Option<RawChangeSet>,
    #[serde(default, rename = "subBuilds")]
    sub_builds: Vec<RawSubBuild>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawAction {
    #[serde(default)]
    causes: Vec<RawCause>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCause {
    #[serde(default, rename = "_class")]
    class_tag: String,
    #[serde(default, rename = "shortDescription")]
    short_description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawParameter {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawChangeSet {
    #[serde(default)]
    items: Vec<RawChangeItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawChangeItem {
    #[serde(rename = "commitId")]
    commit_id: String,
    #[serde(default)]
    msg: String,
    #[serde(default, rename = "authorEmail")]
    author_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSubBuild {
    #[serde(rename = "jobName")]
    job_name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    build: Option<RawNestedBuild>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawNestedBuild {
    #[serde(default, rename = "_class")]
    class_tag: String,
    #[serde(default, rename = "subBuilds")]
    sub_builds: Vec<RawSubBuild>,
}

impl RawSubBuild {
    fn to_node(&self) -> BuildNode {
        // A sub-build whose nested build carries the multi-job marker is a
        // container; traversal recurses into its children.
        if let Some(nested) = &self.build {
            if nested.class_tag == MULTIJOB_MARKER {
                return BuildNode::Container {
                    children: nested.sub_builds.iter().map(RawSubBuild::to_node).collect(),
                };
            }
        }
        BuildNode::Leaf(LeafBuild {
            job_name: self.job_name.clone(),
            url: self.url.clone(),
            result: self.result.clone(),
            duration_ms: self.duration,
        })
    }
}

impl RawBuild {
    fn trigger(&self) -> TriggerKind {
        let causes = self.actions.iter().flat_map(|a| a.causes.iter());
        let mut saw_pull_request = false;
        for cause in causes {
            if cause.class_tag.contains("RebuildCause")
                || cause.short_description.contains("rebuild")
            {
                // Manual rebuilds win even when the original build was a
                // pull-request build.
                return TriggerKind::ManualRebuild;
            }
            if cause.class_tag.contains("GhprbCause") {
                saw_pull_request = true;
            }
        }
        let has_pr_parameter = self
            .actions
            .iter()
            .flat_map(|a| a.parameters.iter())
            .any(|p| p.name == "ghprbPullId");
        if saw_pull_request || has_pr_parameter {
            TriggerKind::PullRequest
        } else {
            TriggerKind::Push
        }
    }

    /// Normalizes this raw nested build into a flat [`BuildRecord`].
    /// External per-commit checks are merged in later by the refresh cycle.
    pub fn to_record(&self) -> BuildRecord {
        let nodes: Vec<BuildNode> = self.sub_builds.iter().map(RawSubBuild::to_node).collect();
        let commits = self
            .change_set
            .as_ref()
            .map(|cs| {
                cs.items
                    .iter()
                    .map(|item| CommitInfo {
                        id: item.commit_id.clone(),
                        message: item.msg.clone(),
                        author: item.author_email.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        BuildRecord {
            number: self.number,
            url: self.url.clone(),
            timestamp: Utc
                .timestamp_millis_opt(self.timestamp)
                .single()
                .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC),
            duration_ms: self.duration,
            trigger: self.trigger(),
            commits,
            jobs: flatten::flatten(&nodes),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    items: Vec<RawQueueItem>,
}

#[derive(Debug, Deserialize)]
struct RawQueueItem {
    task: RawTask,
    #[serde(default)]
    why: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ComputersResponse {
    #[serde(default)]
    computer: Vec<RawComputer>,
}

#[derive(Debug, Deserialize)]
struct RawComputer {
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(default)]
    idle: bool,
    #[serde(default)]
    offline: bool,
}

/// Client for the primary build system's JSON API.
pub struct JenkinsClient {
    client: Client,
    base: Url,
}

impl JenkinsClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = super::build_client()?;
        let base = Url::parse(base_url)
            .map_err(|e| CiPulseError::Config(format!("Invalid base URL: {e}")))?;
        Ok(Self { client, base })
    }

    fn api_url(&self, path: &str, query: Option<(&str, &str)>) -> Result<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| CiPulseError::Config(format!("Invalid API URL: {e}")))?;
        if let Some((key, value)) = query {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    /// Fetches the recent build history for a job as one tree-shaped
    /// document, newest build first.
    pub async fn fetch_builds(&self, job: &str, limit: usize) -> Result<Vec<BuildRecord>> {
        let url = self.api_url(
            &format!("job/{job}/api/json"),
            Some(("tree", &tree_query(limit))),
        )?;
        debug!("Fetching build tree: {url}");

        let response: BuildsResponse = get_json(&self.client, url, None).await?;
        Ok(response.builds.iter().map(RawBuild::to_record).collect())
    }

    /// Fetches current queue entries (task + human-readable reason).
    pub async fn fetch_queue(&self) -> Result<Vec<QueueEntry>> {
        let url = self.api_url("queue/api/json", Some(("tree", "items[task[name],why]")))?;
        let response: QueueResponse = get_json(&self.client, url, None).await?;
        Ok(response
            .items
            .into_iter()
            .map(|item| QueueEntry {
                task: item.task.name,
                reason: item.why.unwrap_or_default(),
            })
            .collect())
    }

    /// Fetches the executor/machine pool with busy/idle/offline flags.
    pub async fn fetch_machines(&self) -> Result<Vec<Machine>> {
        let url = self.api_url(
            "computer/api/json",
            Some(("tree", "computer[displayName,idle,offline]")),
        )?;
        let response: ComputersResponse = get_json(&self.client, url, None).await?;
        Ok(response
            .computer
            .into_iter()
            .map(|c| Machine {
                name: c.display_name,
                busy: !c.idle && !c.offline,
                offline: c.offline,
            })
            .collect())
    }

    /// One lightweight request to confirm the endpoint is reachable.
    pub async fn ping(&self) -> Result<()> {
        let url = self.api_url("api/json", Some(("tree", "description")))?;
        get_with_retry(&self.client, url, None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobIdentity;
    use crate::status::Outcome;

    fn raw_build(json: serde_json::Value) -> RawBuild {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn deserializes_and_flattens_a_nested_build() {
        let raw = raw_build(serde_json::json!({
            "number": 1204,
            "url": "https://ci.helios.dev/job/helios-main/1204/",
            "duration": 5_400_000,
            "timestamp": 1_700_000_000_000i64,
            "result": "FAILURE",
            "subBuilds": [
                {
                    "jobName": "helios-lint",
                    "url": "https://ci.helios.dev/job/helios-lint/88/",
                    "result": "SUCCESS",
                    "duration": 120_000
                },
                {
                    "jobName": "helios-unit",
                    "url": "https://ci.helios.dev/job/helios-unit/90/",
                    "build": {
                        "_class": "com.tikal.jenkins.plugins.multijob.MultiJobBuild",
                        "subBuilds": [
                            {
                                "jobName": "helios-unit-linux-cpu",
                                "url": "https://ci.helios.dev/job/helios-unit-linux-cpu/90/",
                                "result": "FAILURE",
                                "duration": 900_000
                            },
                            {
                                "jobName": "helios-unit-linux-gpu",
                                "url": "https://ci.helios.dev/job/helios-unit-linux-gpu/90/",
                                "result": "SUCCESS",
                                "duration": 1_500_000
                            }
                        ]
                    }
                }
            ]
        }));

        let record = raw.to_record();

        assert_eq!(record.number, 1204);
        assert_eq!(record.jobs.len(), 3, "container expands to its leaves");
        assert_eq!(
            record
                .jobs
                .get(&JobIdentity::primary("unit-linux-cpu"))
                .unwrap()
                .outcome,
            Outcome::Failure
        );
        assert!(record
            .jobs
            .contains_key(&JobIdentity::primary("lint")));
    }

    #[test]
    fn classifies_triggers_with_rebuild_winning() {
        let rebuild = raw_build(serde_json::json!({
            "number": 1, "url": "u", "timestamp": 0,
            "actions": [
                { "causes": [{ "_class": "com.sonyericsson.rebuild.RebuildCause" }] },
                { "parameters": [{ "name": "ghprbPullId" }] }
            ]
        }));
        assert_eq!(rebuild.trigger(), TriggerKind::ManualRebuild);

        let pr = raw_build(serde_json::json!({
            "number": 2, "url": "u", "timestamp": 0,
            "actions": [{ "causes": [{ "_class": "org.jenkinsci.plugins.ghprb.GhprbCause" }] }]
        }));
        assert_eq!(pr.trigger(), TriggerKind::PullRequest);

        let push = raw_build(serde_json::json!({
            "number": 3, "url": "u", "timestamp": 0,
            "actions": [{ "causes": [{ "_class": "hudson.model.Cause$SCMTriggerCause" }] }]
        }));
        assert_eq!(push.trigger(), TriggerKind::Push);
    }

    #[test]
    fn carries_commit_metadata() {
        let raw = raw_build(serde_json::json!({
            "number": 9, "url": "u", "timestamp": 0,
            "changeSet": {
                "items": [
                    { "commitId": "abc123", "msg": "Fix scheduler deadlock", "authorEmail": "dev@helios.dev" }
                ]
            }
        }));

        let record = raw.to_record();
        assert_eq!(record.commits.len(), 1);
        assert_eq!(record.commits[0].id, "abc123");
        assert_eq!(record.commits[0].author.as_deref(), Some("dev@helios.dev"));
    }

    #[tokio::test]
    async fn fetches_queue_and_machines() {
        let mut server = mockito::Server::new_async().await;
        let queue_mock = server
            .mock("GET", mockito::Matcher::Regex("^/queue/api/json".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"items":[{"task":{"name":"helios-unit-linux-gpu"},"why":"Waiting for next available executor"}]}"#)
            .create_async()
            .await;
        let computer_mock = server
            .mock("GET", mockito::Matcher::Regex("^/computer/api/json".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"computer":[{"displayName":"linux-gpu-01","idle":false,"offline":false},{"displayName":"linux-cpu-02","idle":true,"offline":true}]}"#)
            .create_async()
            .await;

        let client = JenkinsClient::new(&server.url()).unwrap();

        let queue = client.fetch_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].task, "helios-unit-linux-gpu");

        let machines = client.fetch_machines().await.unwrap();
        assert_eq!(machines.len(), 2);
        assert!(machines[0].busy);
        assert!(machines[1].offline);

        queue_mock.assert_async().await;
        computer_mock.assert_async().await;
    }
}
