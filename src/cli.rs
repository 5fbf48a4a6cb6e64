use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;

use crate::auth::{load_token, save_token, Token};
use crate::config::Config;
use crate::model::ViewMode;
use crate::output;
use crate::output::PhaseProgress;
use crate::perf::BenchmarkSeries;
use crate::prefs::{FilePreferenceStore, PreferenceStore};
use crate::report::aggregate_archive;
use crate::snapshot::{
    fetch_external_statuses, filter_by_author, spawn_fleet_view, spawn_history_view,
    ExternalSource, FleetView, HistoryEngine, HistoryView, LogSink, SnapshotStore,
};
use crate::sources::github::GitHubClient;
use crate::sources::jenkins::JenkinsClient;
use crate::sources::storage::StorageClient;
use crate::status::Outcome;
use crate::{correlation, status};

#[derive(Parser)]
#[command(name = "cipulse")]
#[command(author, version, about = "CI Build Health Dashboard", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Continuously refresh and render the history and fleet views
    Watch {
        #[arg(short, long)]
        job: Option<String>,

        #[arg(short, long)]
        branch: Option<String>,

        /// Surface binary/smoke-test columns
        #[arg(long, default_value_t = false)]
        binary: bool,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(short, long, env = "CIPULSE_GITHUB_TOKEN")]
        token: Option<String>,
    },

    /// Collect one build-history snapshot and render it
    Snapshot {
        #[arg(short, long)]
        job: Option<String>,

        #[arg(short, long)]
        branch: Option<String>,

        /// Surface binary/smoke-test columns
        #[arg(long, default_value_t = false)]
        binary: bool,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(short, long, env = "CIPULSE_GITHUB_TOKEN")]
        token: Option<String>,
    },

    /// Aggregate a zipped test-report archive, or list published archives
    Report {
        /// Local archive path; omit to list archives in storage
        archive: Option<PathBuf>,
    },

    /// Compare published benchmark runs against the series baseline
    Bench,

    /// Correlate job failures across a branch's status history
    Correlate {
        #[arg(short, long)]
        branch: Option<String>,

        /// Inspect only the newest N commits
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show queue and machine-pool state with cost projections
    Fleet,

    /// List artifacts published by one workflow run
    Artifacts {
        run: u64,

        #[arg(short, long, env = "CIPULSE_GITHUB_TOKEN")]
        token: Option<String>,
    },

    /// Show or update stored view preferences
    Prefs {
        #[arg(long)]
        show_stale: Option<bool>,

        #[arg(long)]
        show_notifications: Option<bool>,

        /// Only show builds whose commit author matches; pass "" to clear
        #[arg(long)]
        filter: Option<String>,
    },

    /// Store a code-hosting credential for later runs
    Login {
        #[arg(env = "CIPULSE_GITHUB_TOKEN")]
        token: String,
    },
}

/// Per-run view settings resolved from the config file plus CLI overrides.
struct ViewArgs {
    job: String,
    branch: String,
    limit: usize,
    mode: ViewMode,
    trunk: bool,
}

impl ViewArgs {
    fn resolve(
        config: &Config,
        job: Option<&str>,
        branch: Option<&str>,
        binary: bool,
    ) -> Self {
        let branch = branch.unwrap_or(&config.view.branch);
        Self {
            job: job.unwrap_or(&config.jenkins.job).to_string(),
            branch: branch.to_string(),
            limit: config.jenkins.limit,
            mode: if binary { ViewMode::Binary } else { config.view.mode },
            trunk: branch == crate::config::TRUNK_BRANCH,
        }
    }
}

fn external_source(config: &Config, token: Option<Token>) -> Result<ExternalSource> {
    if let Some(repo) = &config.github.repo {
        let client = GitHubClient::new(&config.github.base_url, repo, token)?;
        Ok(ExternalSource::GitHub(Arc::new(client)))
    } else {
        let client = StorageClient::new(&config.storage.base_url)?;
        Ok(ExternalSource::Storage {
            client: Arc::new(client),
            prefix: config.storage.status_prefix.clone(),
        })
    }
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        Config::load(self.config.as_deref())
    }

    /// Writes JSON to `--output` when given, otherwise renders to the
    /// terminal.
    fn emit<T: Serialize>(&self, value: &T, render: impl FnOnce()) -> Result<()> {
        if let Some(output_path) = &self.output {
            let json = if self.pretty {
                serde_json::to_string_pretty(value)?
            } else {
                serde_json::to_string(value)?
            };
            std::fs::write(output_path, json)?;
            info!("Output written to: {}", output_path.display());
        } else {
            render();
        }
        Ok(())
    }

    async fn execute_watch(
        &self,
        job: Option<&str>,
        branch: Option<&str>,
        binary: bool,
        limit: Option<usize>,
        token: Option<&str>,
    ) -> Result<()> {
        let config = self.load_config()?;
        let args = ViewArgs::resolve(&config, job, branch, binary);
        let limit = limit.unwrap_or(args.limit);

        let jenkins = Arc::new(JenkinsClient::new(&config.jenkins.base_url)?);
        jenkins.ping().await?;

        let prefs = FilePreferenceStore::new()?.load();
        let token = load_token(token.or(config.github.token.as_deref()));
        let external = external_source(&config, token)?;

        info!("Watching job {} (branch {})", args.job, args.branch);

        let history_store = SnapshotStore::new();
        let history = HistoryView {
            jenkins: jenkins.clone(),
            job: args.job,
            limit,
            external,
            engine: HistoryEngine::new(args.mode, args.trunk, config.cost.clone()),
            store: history_store.clone(),
            sink: Arc::new(LogSink),
            prefs: prefs.clone(),
        };
        let fleet_store = SnapshotStore::new();
        let fleet = FleetView {
            jenkins,
            rates: config.cost.clone(),
            store: fleet_store.clone(),
        };

        let _history_handle = spawn_history_view(
            history,
            Duration::from_secs(config.view.history_interval_secs),
        );
        let _fleet_handle =
            spawn_fleet_view(fleet, Duration::from_secs(config.view.queue_interval_secs));

        let mut ticker =
            tokio::time::interval(Duration::from_secs(config.view.chart_interval_secs));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    if let Some(snapshot) = history_store.latest() {
                        let age = (Utc::now() - snapshot.collected_at).num_seconds().max(0) as u64;
                        if age > 2 * config.view.history_interval_secs && !prefs.show_stale {
                            eprintln!("{}", output::dim("Snapshot is stale, waiting for refresh"));
                        } else {
                            output::print_snapshot(&snapshot);
                        }
                    }
                    if let Some(fleet) = fleet_store.latest() {
                        output::print_fleet(&fleet);
                    }
                }
            }
        }

        info!("Stopping views");
        Ok(())
    }

    async fn execute_snapshot(
        &self,
        job: Option<&str>,
        branch: Option<&str>,
        binary: bool,
        limit: Option<usize>,
        token: Option<&str>,
    ) -> Result<()> {
        let config = self.load_config()?;
        let args = ViewArgs::resolve(&config, job, branch, binary);
        let limit = limit.unwrap_or(args.limit);

        let jenkins = JenkinsClient::new(&config.jenkins.base_url)?;
        let prefs = FilePreferenceStore::new()?.load();
        let token = load_token(token.or(config.github.token.as_deref()));
        let external = external_source(&config, token)?;

        let progress = PhaseProgress::start_phase_1();
        let mut builds = jenkins.fetch_builds(&args.job, limit).await?;
        filter_by_author(&mut builds, &prefs);

        let progress = progress.finish_phase_1_start_phase_2();
        let statuses = fetch_external_statuses(&external, &builds).await;

        let progress = progress.finish_phase_2_start_phase_3();
        let mut engine = HistoryEngine::new(args.mode, args.trunk, config.cost.clone());
        let snapshot = engine.aggregate(builds, &statuses);
        progress.finish_phase_3();

        self.emit(&snapshot, || output::print_snapshot(&snapshot))
    }

    async fn execute_report(&self, archive: Option<&PathBuf>) -> Result<()> {
        let Some(path) = archive else {
            // No local archive: list what storage has published.
            let config = self.load_config()?;
            let storage = StorageClient::new(&config.storage.base_url)?;
            let keys = storage.list_keys(&config.storage.report_prefix).await?;
            if keys.is_empty() {
                println!("{}", output::dim("No report archives published"));
            }
            for key in keys {
                println!("{key}");
            }
            return Ok(());
        };

        let file = std::fs::File::open(path)?;
        let summary = aggregate_archive(file)?;
        self.emit(&summary, || output::print_report(&summary))
    }

    async fn execute_bench(&self) -> Result<()> {
        let config = self.load_config()?;
        let storage = StorageClient::new(&config.storage.base_url)?;
        let prefix = &config.storage.bench_prefix;

        let index = storage.fetch_bench_index(prefix).await?;
        let fetches = index.iter().map(|meta| storage.fetch_bench_run(prefix, &meta.path));

        // Runs are ingested oldest first; a failed fetch drops that run
        // without shifting the baseline off the oldest successful one.
        let mut series = BenchmarkSeries::new();
        for (meta, result) in index.iter().zip(join_all(fetches).await) {
            match result {
                Ok(run) => series.ingest(run.label, &run.means),
                Err(e) => warn!("Benchmark run fetch failed for {}: {e}", meta.path),
            }
        }

        self.emit(&series, || output::print_bench(&series))
    }

    async fn execute_correlate(&self, branch: Option<&str>, limit: Option<usize>) -> Result<()> {
        let config = self.load_config()?;
        let storage = StorageClient::new(&config.storage.base_url)?;
        let branch = branch.unwrap_or(&config.view.branch);
        let prefix = &config.storage.branch_prefix;

        let mut commits = storage.fetch_branch_index(prefix, branch).await?;
        if let Some(limit) = limit {
            commits.truncate(limit);
        }
        info!("Correlating failures across {} commits on {branch}", commits.len());

        let fetches = commits
            .iter()
            .map(|commit| storage.fetch_branch_commit(prefix, branch, commit));

        let per_commit: Vec<Option<HashMap<String, Outcome>>> = join_all(fetches)
            .await
            .into_iter()
            .zip(&commits)
            .map(|(result, commit)| match result {
                Ok(doc) => Some(
                    doc.into_iter()
                        .map(|(job, check)| (job, status::classify(check.status.as_deref())))
                        .collect(),
                ),
                Err(e) => {
                    warn!("Status fetch failed for {commit}: {e}");
                    None
                }
            })
            .collect();

        let matrix = correlation::build_matrix(&per_commit);
        self.emit(&matrix, || output::print_correlation(&matrix))
    }

    async fn execute_fleet(&self) -> Result<()> {
        let config = self.load_config()?;
        let view = FleetView {
            jenkins: Arc::new(JenkinsClient::new(&config.jenkins.base_url)?),
            rates: config.cost.clone(),
            store: SnapshotStore::new(),
        };
        let snapshot = view.refresh().await?;
        self.emit(&snapshot, || output::print_fleet(&snapshot))
    }

    async fn execute_artifacts(&self, run: u64, token: Option<&str>) -> Result<()> {
        let config = self.load_config()?;
        let repo = config
            .github
            .repo
            .as_deref()
            .ok_or_else(|| anyhow!("No repository configured; set github.repo"))?;
        let token = load_token(token.or(config.github.token.as_deref()));

        let client = GitHubClient::new(&config.github.base_url, repo, token)?;
        let artifacts = client.fetch_artifacts(run).await?;
        if artifacts.is_empty() {
            println!("{}", output::dim("Run published no artifacts"));
        }
        for artifact in artifacts {
            println!(
                "{}\t{} bytes\t{}",
                artifact.name, artifact.size_in_bytes, artifact.archive_download_url
            );
        }
        Ok(())
    }

    fn execute_prefs(
        &self,
        show_stale: Option<bool>,
        show_notifications: Option<bool>,
        filter: Option<&str>,
    ) -> Result<()> {
        let store = FilePreferenceStore::new()?;
        let mut prefs = store.load();

        let changed = show_stale.is_some() || show_notifications.is_some() || filter.is_some();
        if let Some(value) = show_stale {
            prefs.show_stale = value;
        }
        if let Some(value) = show_notifications {
            prefs.show_notifications = value;
        }
        if let Some(value) = filter {
            prefs.username_filter = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
        if changed {
            store.save(&prefs)?;
            info!("Preferences saved");
        }

        self.emit(&prefs, || {
            println!("show-stale: {}", prefs.show_stale);
            println!("show-notifications: {}", prefs.show_notifications);
            println!(
                "username-filter: {}",
                prefs.username_filter.as_deref().unwrap_or("(none)")
            );
        })
    }

    fn execute_login(&self, token: &str) -> Result<()> {
        save_token(&Token::from(token))?;
        info!("Credential stored");
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Watch {
                job,
                branch,
                binary,
                limit,
                token,
            } => {
                self.execute_watch(
                    job.as_deref(),
                    branch.as_deref(),
                    *binary,
                    *limit,
                    token.as_deref(),
                )
                .await
            }
            Commands::Snapshot {
                job,
                branch,
                binary,
                limit,
                token,
            } => {
                self.execute_snapshot(
                    job.as_deref(),
                    branch.as_deref(),
                    *binary,
                    *limit,
                    token.as_deref(),
                )
                .await
            }
            Commands::Report { archive } => self.execute_report(archive.as_ref()).await,
            Commands::Bench => self.execute_bench().await,
            Commands::Correlate { branch, limit } => {
                self.execute_correlate(branch.as_deref(), *limit).await
            }
            Commands::Fleet => self.execute_fleet().await,
            Commands::Artifacts { run, token } => {
                self.execute_artifacts(*run, token.as_deref()).await
            }
            Commands::Prefs {
                show_stale,
                show_notifications,
                filter,
            } => self.execute_prefs(*show_stale, *show_notifications, filter.as_deref()),
            Commands::Login { token } => self.execute_login(token),
        }
    }
}
