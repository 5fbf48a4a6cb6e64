use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cost::RateTable;
use crate::model::ViewMode;

/// Configuration file structure for cipulse.
///
/// Lets users pin source endpoints and refresh behavior instead of passing
/// them on every run. Files are loaded from the current directory or a
/// specified path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Primary build-system endpoint
    pub jenkins: JenkinsConfig,

    /// Code-hosting API endpoint
    pub github: GitHubConfig,

    /// Object-storage artifact endpoints
    pub storage: StorageConfig,

    /// Refresh/view behavior
    pub view: ViewConfig,

    /// Per-node-class hourly compute rates (cents)
    pub cost: RateTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct JenkinsConfig {
    /// Build-server base URL
    pub base_url: String,

    /// Job whose build history is displayed
    pub job: String,

    /// Maximum number of builds to fetch per refresh
    pub limit: usize,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ci.helios.dev".to_string(),
            job: "helios-main".to_string(),
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GitHubConfig {
    /// GitHub API base URL
    pub base_url: String,

    /// Repository path (e.g. 'owner/repo')
    pub repo: Option<String>,

    /// Personal access token; can also come from the token file
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            repo: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    /// Object-storage bucket base URL
    pub base_url: String,

    /// Prefix for per-commit external status documents
    pub status_prefix: String,

    /// Prefix for per-branch status indexes
    pub branch_prefix: String,

    /// Prefix for benchmark run documents
    pub bench_prefix: String,

    /// Prefix for zipped test-report archives
    pub report_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: "https://artifacts.helios.dev".to_string(),
            status_prefix: "status".to_string(),
            branch_prefix: "branches".to_string(),
            bench_prefix: "benchmarks".to_string(),
            report_prefix: "reports".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ViewConfig {
    /// Column-filtering mode
    pub mode: ViewMode,

    /// Branch the history view follows
    pub branch: String,

    /// Build-history refresh interval in seconds
    pub history_interval_secs: u64,

    /// Queue/machine-pool refresh interval in seconds
    pub queue_interval_secs: u64,

    /// Coarse status-chart refresh interval in seconds
    pub chart_interval_secs: u64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            mode: ViewMode::Default,
            branch: "main".to_string(),
            history_interval_secs: 60,
            queue_interval_secs: 1,
            chart_interval_secs: 5,
        }
    }
}

/// Branch whose views run streak detection and notifications.
pub const TRUNK_BRANCH: &str = "main";

fn default_limit() -> usize {
    25
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cipulse.toml
    /// 3. ./cipulse.json
    /// 4. ./cipulse.yaml
    /// 5. ./cipulse.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["cipulse.toml", "cipulse.json", "cipulse.yaml", "cipulse.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
