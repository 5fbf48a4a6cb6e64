use std::collections::{BTreeMap, HashMap};

use log::debug;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{CiPulseError, Result};
use crate::flatten::ExternalCheck;

use super::{get_json, get_with_retry};

#[derive(Debug, Deserialize)]
struct StatusEntry {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    build_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchStatusEntry {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    build_url: Option<String>,
    #[serde(default)]
    duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BranchIndex {
    #[serde(default)]
    commits: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BenchIndex {
    #[serde(default)]
    runs: Vec<BenchRunMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchRunMeta {
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct BenchRunDoc {
    #[serde(default)]
    benchmarks: Vec<BenchEntry>,
    #[serde(default)]
    machine_info: MachineInfo,
}

#[derive(Debug, Deserialize)]
struct BenchEntry {
    name: String,
    stats: BenchStats,
}

#[derive(Debug, Deserialize)]
struct BenchStats {
    mean: f64,
}

#[derive(Debug, Default, Deserialize)]
struct MachineInfo {
    #[serde(default)]
    version: String,
}

/// One benchmark run fetched from storage: version label plus
/// `benchmark name -> mean`.
#[derive(Debug, Clone)]
pub struct BenchRunData {
    pub label: String,
    pub means: BTreeMap<String, f64>,
}

/// Client for static JSON/XML artifacts published to object storage.
///
/// No credential; documents are public. Each fetch is independent so the
/// refresh cycle can fan out and isolate failures per document.
pub struct StorageClient {
    client: Client,
    base: Url,
}

impl StorageClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: super::build_client()?,
            base: Url::parse(base_url)
                .map_err(|e| CiPulseError::Config(format!("Invalid base URL: {e}")))?,
        })
    }

    fn key_url(&self, key: &str) -> Result<Url> {
        self.base
            .join(key)
            .map_err(|e| CiPulseError::Config(format!("Invalid storage key: {e}")))
    }

    /// Fetches the external per-commit status document
    /// (`{prefix}/{commit}.json`, job name -> {status, build_url}).
    pub async fn fetch_status_doc(
        &self,
        prefix: &str,
        commit: &str,
    ) -> Result<HashMap<String, ExternalCheck>> {
        let url = self.key_url(&format!("{prefix}/{commit}.json"))?;
        debug!("Fetching status doc: {url}");
        let doc: HashMap<String, StatusEntry> = get_json(&self.client, url, None).await?;

        Ok(doc
            .into_iter()
            .map(|(name, entry)| {
                (
                    name,
                    ExternalCheck {
                        status: entry.status,
                        url: entry.build_url.unwrap_or_default(),
                        duration_ms: None,
                    },
                )
            })
            .collect())
    }

    /// Fetches the per-branch index of known commit ids.
    pub async fn fetch_branch_index(&self, prefix: &str, branch: &str) -> Result<Vec<String>> {
        let url = self.key_url(&format!("{prefix}/{branch}/index.json"))?;
        let index: BranchIndex = get_json(&self.client, url, None).await?;
        Ok(index.commits)
    }

    /// Fetches one commit's per-branch status document
    /// (job name -> {result, build_url, duration}).
    pub async fn fetch_branch_commit(
        &self,
        prefix: &str,
        branch: &str,
        commit: &str,
    ) -> Result<HashMap<String, ExternalCheck>> {
        let url = self.key_url(&format!("{prefix}/{branch}/{commit}.json"))?;
        let doc: HashMap<String, BranchStatusEntry> = get_json(&self.client, url, None).await?;

        Ok(doc
            .into_iter()
            .map(|(name, entry)| {
                (
                    name,
                    ExternalCheck {
                        status: entry.result,
                        url: entry.build_url.unwrap_or_default(),
                        duration_ms: entry.duration,
                    },
                )
            })
            .collect())
    }

    /// Fetches the benchmark run index, oldest run first.
    pub async fn fetch_bench_index(&self, prefix: &str) -> Result<Vec<BenchRunMeta>> {
        let url = self.key_url(&format!("{prefix}/index.json"))?;
        let index: BenchIndex = get_json(&self.client, url, None).await?;
        Ok(index.runs)
    }

    /// Fetches one benchmark run document.
    pub async fn fetch_bench_run(&self, prefix: &str, path: &str) -> Result<BenchRunData> {
        let url = self.key_url(&format!("{prefix}/{path}"))?;
        let doc: BenchRunDoc = get_json(&self.client, url, None).await?;

        Ok(BenchRunData {
            label: doc.machine_info.version,
            means: doc
                .benchmarks
                .into_iter()
                .map(|bench| (bench.name, bench.stats.mean))
                .collect(),
        })
    }

    /// Lists bucket keys under a prefix via the XML listing endpoint.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("prefix", prefix);
        let body = get_with_retry(&self.client, url, None).await?;

        let doc = roxmltree::Document::parse(&body)
            .map_err(|e| CiPulseError::Xml(format!("bucket listing: {e}")))?;

        Ok(doc
            .descendants()
            .filter(|node| node.has_tag_name("Contents"))
            .filter_map(|contents| {
                contents
                    .children()
                    .find(|child| child.has_tag_name("Key"))
                    .and_then(|key| key.text())
                    .map(str::to_string)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_and_maps_status_docs() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status/abc123.json")
            .with_body(
                r#"{"unit-win-gpu":{"status":"failure","build_url":"https://checks/1"},
                    "lint":{"status":"success"}}"#,
            )
            .create_async()
            .await;

        let client = StorageClient::new(&server.url()).unwrap();
        let checks = client.fetch_status_doc("status", "abc123").await.unwrap();

        assert_eq!(checks.len(), 2);
        assert_eq!(checks["unit-win-gpu"].status.as_deref(), Some("failure"));
        assert_eq!(checks["unit-win-gpu"].url, "https://checks/1");
        assert!(checks["lint"].url.is_empty());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetches_branch_index_and_commit_docs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/branches/main/index.json")
            .with_body(r#"{"commits":["abc123","def456"]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/branches/main/abc123.json")
            .with_body(r#"{"unit-osx":{"result":"failure","build_url":"u","duration":900}}"#)
            .create_async()
            .await;

        let client = StorageClient::new(&server.url()).unwrap();

        let commits = client.fetch_branch_index("branches", "main").await.unwrap();
        assert_eq!(commits, vec!["abc123", "def456"]);

        let doc = client
            .fetch_branch_commit("branches", "main", "abc123")
            .await
            .unwrap();
        assert_eq!(doc["unit-osx"].duration_ms, Some(900));
    }

    #[tokio::test]
    async fn fetches_bench_runs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/benchmarks/index.json")
            .with_body(r#"{"runs":[{"path":"run-001.json"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/benchmarks/run-001.json")
            .with_body(
                r#"{"benchmarks":[{"name":"matmul","stats":{"mean":100.5}}],
                    "machine_info":{"version":"v1.0.0"}}"#,
            )
            .create_async()
            .await;

        let client = StorageClient::new(&server.url()).unwrap();

        let index = client.fetch_bench_index("benchmarks").await.unwrap();
        assert_eq!(index.len(), 1);

        let run = client
            .fetch_bench_run("benchmarks", &index[0].path)
            .await
            .unwrap();
        assert_eq!(run.label, "v1.0.0");
        assert_eq!(run.means["matmul"], 100.5);
    }

    #[tokio::test]
    async fn parses_xml_bucket_listing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_query(mockito::Matcher::UrlEncoded(
                "prefix".into(),
                "reports".into(),
            ))
            .with_body(
                r#"<?xml version="1.0"?>
<ListBucketResult>
  <Contents><Key>reports/build-1204.zip</Key><Size>1024</Size></Contents>
  <Contents><Key>reports/build-1205.zip</Key><Size>2048</Size></Contents>
</ListBucketResult>"#,
            )
            .create_async()
            .await;

        let client = StorageClient::new(&server.url()).unwrap();
        let keys = client.list_keys("reports").await.unwrap();

        assert_eq!(
            keys,
            vec!["reports/build-1204.zip", "reports/build-1205.zip"]
        );
    }

    #[tokio::test]
    async fn malformed_listing_is_an_xml_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_query(mockito::Matcher::Any)
            .with_body("<ListBucketResult><Contents>")
            .create_async()
            .await;

        let client = StorageClient::new(&server.url()).unwrap();
        let result = client.list_keys("reports").await;
        assert!(matches!(result, Err(CiPulseError::Xml(_))));
    }
}
