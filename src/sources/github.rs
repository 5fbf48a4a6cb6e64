use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::auth::Token;
use crate::error::{CiPulseError, Result};
use crate::flatten::ExternalCheck;

use super::get_json;

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    #[serde(default)]
    check_runs: Vec<RawCheckRun>,
}

#[derive(Debug, Deserialize)]
struct RawCheckRun {
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

impl RawCheckRun {
    fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawArtifact {
    pub name: String,
    pub archive_download_url: String,
    #[serde(default)]
    pub size_in_bytes: u64,
}

/// Client for the code-hosting REST API (check runs, workflow artifacts).
///
/// All queries are read-only. A missing credential only blocks the views
/// that need one; the error surfaces as `Unauthenticated`.
pub struct GitHubClient {
    client: Client,
    base: Url,
    owner: String,
    repo: String,
    token: Option<Token>,
}

impl GitHubClient {
    pub fn new(base_url: &str, repo_path: &str, token: Option<Token>) -> Result<Self> {
        let (owner, repo) = repo_path.split_once('/').ok_or_else(|| {
            CiPulseError::Config("Repository path must be in format 'owner/repo'".into())
        })?;
        if repo.contains('/') {
            return Err(CiPulseError::Config(
                "Repository path must be in format 'owner/repo'".into(),
            ));
        }

        Ok(Self {
            client: super::build_client()?,
            base: Url::parse(base_url)
                .map_err(|e| CiPulseError::Config(format!("Invalid base URL: {e}")))?,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
        })
    }

    fn repo_url(&self, tail: &str) -> Result<Url> {
        self.base
            .join(&format!(
                "repos/{}/{}/{tail}?per_page={PER_PAGE}",
                self.owner, self.repo
            ))
            .map_err(|e| CiPulseError::Config(format!("Invalid API URL: {e}")))
    }

    /// Fetches check-run results for one commit as a flat job-name map,
    /// ready to merge into a flattened build record.
    pub async fn fetch_check_runs(&self, sha: &str) -> Result<HashMap<String, ExternalCheck>> {
        let url = self.repo_url(&format!("commits/{sha}/check-runs"))?;
        debug!("Fetching check runs for {sha}");

        let response: CheckRunsResponse =
            get_json(&self.client, url, self.token.as_ref()).await?;

        Ok(response
            .check_runs
            .into_iter()
            .map(|run| {
                let check = ExternalCheck {
                    status: run.conclusion.clone(),
                    url: run.html_url.clone().unwrap_or_default(),
                    duration_ms: run.duration_ms(),
                };
                (run.name, check)
            })
            .collect())
    }

    /// Lists artifacts published by one workflow run.
    pub async fn fetch_artifacts(&self, run_id: u64) -> Result<Vec<RawArtifact>> {
        let url = self.repo_url(&format!("actions/runs/{run_id}/artifacts"))?;
        let response: ArtifactsResponse =
            get_json(&self.client, url, self.token.as_ref()).await?;
        Ok(response.artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_repo_paths() {
        assert!(GitHubClient::new("https://api.github.com", "invalid-path", None).is_err());
        assert!(GitHubClient::new("https://api.github.com", "a/b/c", None).is_err());
        assert!(GitHubClient::new("https://api.github.com", "helios/helios", None).is_ok());
    }

    #[tokio::test]
    async fn maps_check_runs_to_external_checks() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/repos/helios/helios/commits/abc123/check-runs",
            )
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"check_runs":[
                    {"name":"unit-win-gpu","conclusion":"failure",
                     "html_url":"https://github.com/checks/1",
                     "started_at":"2026-08-01T10:00:00Z",
                     "completed_at":"2026-08-01T10:30:00Z"},
                    {"name":"binary-linux-cpu","conclusion":null}
                ]}"#,
            )
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), "helios/helios", None).unwrap();
        let checks = client.fetch_check_runs("abc123").await.unwrap();

        assert_eq!(checks.len(), 2);
        let failed = &checks["unit-win-gpu"];
        assert_eq!(failed.status.as_deref(), Some("failure"));
        assert_eq!(failed.duration_ms, Some(30 * 60 * 1000));
        assert!(
            checks["binary-linux-cpu"].status.is_none(),
            "in-progress run has no conclusion yet"
        );

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_credential_surfaces_as_unauthenticated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/repos/helios/helios/commits/abc123/check-runs",
            )
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), "helios/helios", None).unwrap();
        let result = client.fetch_check_runs("abc123").await;

        assert!(matches!(result, Err(CiPulseError::Unauthenticated(_))));
    }
}
