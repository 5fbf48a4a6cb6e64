use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::columns::known_job_set;
use crate::cost::{self, Cost, FleetCost, RateTable};
use crate::error::Result;
use crate::flatten::{merge_external, ExternalCheck};
use crate::model::{BuildRecord, JobIdentity, Machine, QueueEntry, ViewMode};
use crate::prefs::Preferences;
use crate::sources::github::GitHubClient;
use crate::sources::jenkins::JenkinsClient;
use crate::sources::storage::StorageClient;
use crate::streaks::{self, StreakMap, StreakSignal};

/// Consumer of streak transition signals. The detector only computes
/// signals; dispatching them is the sink's business, which keeps the
/// detector unit-testable.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, signal: &StreakSignal);
}

/// Default sink: structured log lines.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, signal: &StreakSignal) {
        match signal {
            StreakSignal::Alarm { job, count } => {
                warn!("Job {job} is alarming: {count} consecutive failures");
            }
            StreakSignal::Recovery { job } => {
                info!("Job {job} recovered");
            }
        }
    }
}

/// Finished aggregation state for one build-history view. Recreated in
/// full on every poll cycle; the rendering layer only ever reads this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub collected_at: DateTime<Utc>,
    pub builds: Vec<BuildRecord>,
    pub columns: Vec<JobIdentity>,
    pub streaks: StreakMap,
    pub signals: Vec<StreakSignal>,
    /// Per-build cost, aligned with `builds`.
    pub build_costs: Vec<Cost>,
    pub total_cost: Cost,
}

/// Queue/machine-pool state for the fleet view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub collected_at: DateTime<Utc>,
    pub queue: Vec<QueueEntry>,
    pub machines: Vec<Machine>,
    pub cost: FleetCost,
}

/// Shared handle to the last published snapshot of one view.
#[derive(Clone)]
pub struct SnapshotStore<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Default for SnapshotStore<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Clone> SnapshotStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn publish(&self, snapshot: T) {
        *self.inner.lock().expect("snapshot lock poisoned") = Some(snapshot);
    }

    pub fn latest(&self) -> Option<T> {
        self.inner.lock().expect("snapshot lock poisoned").clone()
    }
}

/// Pure aggregation core of the history view: builds plus per-commit
/// external checks in, snapshot out.
///
/// Holds the only cross-cycle mutable state, the previous cycle's streak
/// map, read then replaced by each call (single writer).
pub struct HistoryEngine {
    mode: ViewMode,
    /// Streak detection only runs for views following the trunk branch,
    /// not arbitrary branches or pull-request views.
    trunk: bool,
    rates: RateTable,
    previous_streaks: Option<StreakMap>,
}

impl HistoryEngine {
    pub fn new(mode: ViewMode, trunk: bool, rates: RateTable) -> Self {
        Self {
            mode,
            trunk,
            rates,
            previous_streaks: None,
        }
    }

    pub fn aggregate(
        &mut self,
        mut builds: Vec<BuildRecord>,
        external: &HashMap<String, HashMap<String, ExternalCheck>>,
    ) -> Snapshot {
        for build in &mut builds {
            for commit in build.commits.clone() {
                if let Some(checks) = external.get(&commit.id) {
                    merge_external(&mut build.jobs, checks);
                }
            }
        }

        let columns = known_job_set(&builds, self.mode);

        let (streaks, signals) = if self.trunk {
            let current = streaks::compute(&columns, &builds);
            let signals = streaks::diff(self.previous_streaks.as_ref(), &current);
            self.previous_streaks = Some(current.clone());
            (current, signals)
        } else {
            (StreakMap::new(), Vec::new())
        };

        let build_costs: Vec<Cost> = builds
            .iter()
            .map(|build| cost::build_cost(&self.rates, build))
            .collect();
        let total_cost = build_costs.iter().copied().sum();

        Snapshot {
            collected_at: Utc::now(),
            builds,
            columns,
            streaks,
            signals,
            build_costs,
            total_cost,
        }
    }

    /// Clears cross-cycle state when the view's subject changes.
    pub fn reset(&mut self) {
        self.previous_streaks = None;
    }
}

/// Where per-commit external check results come from.
pub enum ExternalSource {
    GitHub(Arc<GitHubClient>),
    Storage { client: Arc<StorageClient>, prefix: String },
    None,
}

impl ExternalSource {
    async fn fetch(&self, commit: &str) -> Result<HashMap<String, ExternalCheck>> {
        match self {
            ExternalSource::GitHub(client) => client.fetch_check_runs(commit).await,
            ExternalSource::Storage { client, prefix } => {
                client.fetch_status_doc(prefix, commit).await
            }
            ExternalSource::None => Ok(HashMap::new()),
        }
    }
}

/// Drops builds whose commits do not match the author filter. A build
/// with no commit metadata never matches a filter.
pub fn filter_by_author(builds: &mut Vec<BuildRecord>, prefs: &Preferences) {
    let Some(filter) = &prefs.username_filter else {
        return;
    };
    builds.retain(|build| {
        build.commits.iter().any(|commit| {
            commit
                .author
                .as_deref()
                .is_some_and(|author| author.contains(filter.as_str()))
        })
    });
}

/// Fans out one external-status fetch per distinct commit and joins them.
///
/// A failed fetch contributes an empty result for its commit and never
/// aborts its siblings.
pub async fn fetch_external_statuses(
    source: &ExternalSource,
    builds: &[BuildRecord],
) -> HashMap<String, HashMap<String, ExternalCheck>> {
    let commit_ids: BTreeSet<String> = builds
        .iter()
        .flat_map(|build| build.commits.iter().map(|c| c.id.clone()))
        .collect();

    let fetches = commit_ids.iter().map(|id| {
        async move { (id.clone(), source.fetch(id).await) }
    });

    let mut external = HashMap::new();
    for (id, result) in join_all(fetches).await {
        match result {
            Ok(checks) => {
                external.insert(id, checks);
            }
            Err(e) => {
                warn!("External status fetch failed for {id}: {e}");
                external.insert(id, HashMap::new());
            }
        }
    }
    external
}

/// One build-history view: owns its fetch fan-out, aggregation engine,
/// snapshot store and notification sink.
pub struct HistoryView {
    pub jenkins: Arc<JenkinsClient>,
    pub job: String,
    pub limit: usize,
    pub external: ExternalSource,
    pub engine: HistoryEngine,
    pub store: SnapshotStore<Snapshot>,
    pub sink: Arc<dyn NotificationSink>,
    pub prefs: Preferences,
}

impl HistoryView {
    /// Runs one refresh cycle: fetch the build tree, fan out per-commit
    /// external lookups, join everything, aggregate, publish.
    ///
    /// A failed per-commit fetch contributes an empty result for its
    /// commit and never aborts its siblings or the cycle.
    pub async fn refresh(&mut self) -> Result<Snapshot> {
        let mut builds = self.jenkins.fetch_builds(&self.job, self.limit).await?;
        filter_by_author(&mut builds, &self.prefs);

        let external = fetch_external_statuses(&self.external, &builds).await;
        let snapshot = self.engine.aggregate(builds, &external);

        if self.prefs.show_notifications {
            for signal in &snapshot.signals {
                self.sink.notify(signal);
            }
        }

        self.store.publish(snapshot.clone());
        Ok(snapshot)
    }
}

/// The fleet (queue + machine pool) view.
pub struct FleetView {
    pub jenkins: Arc<JenkinsClient>,
    pub rates: RateTable,
    pub store: SnapshotStore<FleetSnapshot>,
}

impl FleetView {
    pub async fn refresh(&self) -> Result<FleetSnapshot> {
        let (queue, machines) =
            tokio::join!(self.jenkins.fetch_queue(), self.jenkins.fetch_machines());
        let queue = queue?;
        let machines = machines?;

        let snapshot = FleetSnapshot {
            collected_at: Utc::now(),
            cost: cost::fleet_cost(&self.rates, &machines),
            queue,
            machines,
        };
        self.store.publish(snapshot.clone());
        Ok(snapshot)
    }
}

/// Handle to a view's repeating refresh task.
///
/// Dropping or stopping the handle aborts the task, tearing down the
/// timer and discarding any in-flight responses. Changing a view's
/// subject is stop-then-spawn: the replacement view starts with fresh
/// state, so stale responses can never reach it.
pub struct ViewHandle {
    task: JoinHandle<()>,
}

impl ViewHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns a history view refreshing on a fixed interval. Errors in one
/// cycle are logged and the next tick retries; they never poison the
/// stored snapshot or any other view.
pub fn spawn_history_view(mut view: HistoryView, interval: Duration) -> ViewHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = view.refresh().await {
                warn!("History refresh failed: {e}");
            }
        }
    });
    ViewHandle { task }
}

pub fn spawn_fleet_view(view: FleetView, interval: Duration) -> ViewHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = view.refresh().await {
                warn!("Fleet refresh failed: {e}");
            }
        }
    });
    ViewHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitInfo, SubResult, TriggerKind};
    use crate::status::Outcome;
    use indexmap::IndexMap;

    fn build(number: u64, commit: &str, results: &[(&str, Outcome)]) -> BuildRecord {
        let mut jobs = IndexMap::new();
        for (name, outcome) in results {
            jobs.insert(
                JobIdentity::primary(*name),
                SubResult {
                    outcome: *outcome,
                    duration_ms: 60_000,
                    url: String::new(),
                    node: Some(crate::naming::NodeClass::LinuxCpu),
                },
            );
        }
        BuildRecord {
            number,
            url: String::new(),
            timestamp: Utc::now(),
            duration_ms: 0,
            trigger: TriggerKind::Push,
            commits: vec![CommitInfo {
                id: commit.to_string(),
                message: "msg".to_string(),
                author: None,
            }],
            jobs,
        }
    }

    fn checks(entries: &[(&str, &str)]) -> HashMap<String, ExternalCheck> {
        entries
            .iter()
            .map(|(name, status)| {
                (
                    name.to_string(),
                    ExternalCheck {
                        status: Some(status.to_string()),
                        url: String::new(),
                        duration_ms: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn aggregate_merges_external_checks_by_commit() {
        let mut engine = HistoryEngine::new(ViewMode::Default, true, RateTable::default());
        let builds = vec![build(1, "abc", &[("lint", Outcome::Success)])];
        let mut external = HashMap::new();
        external.insert("abc".to_string(), checks(&[("unit-win-gpu", "failure")]));

        let snapshot = engine.aggregate(builds, &external);

        assert_eq!(snapshot.builds[0].jobs.len(), 2);
        let keys: Vec<&str> = snapshot.columns.iter().map(JobIdentity::as_str).collect();
        assert_eq!(keys, vec!["gh/unit-win-gpu", "lint"]);
    }

    #[test]
    fn aggregate_fires_signals_only_after_first_cycle() {
        let mut engine = HistoryEngine::new(ViewMode::Default, true, RateTable::default());
        let failing = || {
            vec![
                build(3, "c3", &[("unit-osx", Outcome::Failure)]),
                build(2, "c2", &[("unit-osx", Outcome::Failure)]),
                build(1, "c1", &[("unit-osx", Outcome::Success)]),
            ]
        };

        let first = engine.aggregate(failing(), &HashMap::new());
        assert_eq!(first.streaks.len(), 1, "streak computed");
        assert!(first.signals.is_empty(), "no signals on initial load");

        let second = engine.aggregate(failing(), &HashMap::new());
        assert!(second.signals.is_empty(), "still alarming, no transition");
    }

    #[test]
    fn aggregate_skips_streaks_off_trunk() {
        let mut engine = HistoryEngine::new(ViewMode::Default, false, RateTable::default());
        let builds = vec![
            build(2, "c2", &[("unit-osx", Outcome::Failure)]),
            build(1, "c1", &[("unit-osx", Outcome::Failure)]),
        ];

        let snapshot = engine.aggregate(builds, &HashMap::new());
        assert!(snapshot.streaks.is_empty());
        assert!(snapshot.signals.is_empty());
    }

    #[test]
    fn reset_clears_previous_streaks() {
        let mut engine = HistoryEngine::new(ViewMode::Default, true, RateTable::default());
        let failing = vec![
            build(2, "c2", &[("unit-osx", Outcome::Failure)]),
            build(1, "c1", &[("unit-osx", Outcome::Failure)]),
        ];
        engine.aggregate(failing.clone(), &HashMap::new());

        engine.reset();
        let after = engine.aggregate(failing, &HashMap::new());
        assert!(
            after.signals.is_empty(),
            "after a subject switch the next cycle is an initial load again"
        );
    }

    #[test]
    fn aggregate_sums_build_costs() {
        let mut engine = HistoryEngine::new(ViewMode::Default, true, RateTable::default());
        let builds = vec![build(1, "c1", &[("unit-linux-cpu", Outcome::Success)])];

        let snapshot = engine.aggregate(builds, &HashMap::new());
        assert_eq!(snapshot.build_costs.len(), 1);
        assert!(!snapshot.total_cost.is_indeterminate());
    }

    #[test]
    fn author_filter_keeps_matching_builds_only() {
        let mut builds = vec![
            build(2, "c2", &[]),
            build(1, "c1", &[]),
        ];
        builds[0].commits[0].author = Some("dev@helios.dev".to_string());

        let prefs = Preferences {
            username_filter: Some("dev".to_string()),
            ..Preferences::default()
        };
        filter_by_author(&mut builds, &prefs);

        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].number, 2);

        let mut unfiltered = vec![build(3, "c3", &[])];
        filter_by_author(&mut unfiltered, &Preferences::default());
        assert_eq!(unfiltered.len(), 1, "no filter keeps everything");
    }

    #[test]
    fn store_round_trips_latest() {
        let store: SnapshotStore<u32> = SnapshotStore::new();
        assert!(store.latest().is_none());
        store.publish(7);
        store.publish(8);
        assert_eq!(store.latest(), Some(8));
    }

    struct CollectingSink(Mutex<Vec<StreakSignal>>);

    impl NotificationSink for CollectingSink {
        fn notify(&self, signal: &StreakSignal) {
            self.0.lock().unwrap().push(signal.clone());
        }
    }

    #[tokio::test]
    async fn refresh_dispatches_signals_when_notifications_enabled() {
        let mut server = mockito::Server::new_async().await;
        // First cycle: healthy. Second cycle: two consecutive failures.
        let healthy = r#"{"builds":[
            {"number":2,"url":"u","timestamp":0,"result":"SUCCESS",
             "subBuilds":[{"jobName":"helios-unit-osx","url":"u","result":"SUCCESS","duration":1000}]},
            {"number":1,"url":"u","timestamp":0,"result":"SUCCESS",
             "subBuilds":[{"jobName":"helios-unit-osx","url":"u","result":"SUCCESS","duration":1000}]}
        ]}"#;
        let failing = r#"{"builds":[
            {"number":4,"url":"u","timestamp":0,"result":"FAILURE",
             "subBuilds":[{"jobName":"helios-unit-osx","url":"u","result":"FAILURE","duration":1000}]},
            {"number":3,"url":"u","timestamp":0,"result":"FAILURE",
             "subBuilds":[{"jobName":"helios-unit-osx","url":"u","result":"FAILURE","duration":1000}]}
        ]}"#;
        server
            .mock("GET", mockito::Matcher::Regex("^/job/helios-main/api/json".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_body(healthy)
            .create_async()
            .await;

        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let mut view = HistoryView {
            jenkins: Arc::new(JenkinsClient::new(&server.url()).unwrap()),
            job: "helios-main".to_string(),
            limit: 10,
            external: ExternalSource::None,
            engine: HistoryEngine::new(ViewMode::Default, true, RateTable::default()),
            store: SnapshotStore::new(),
            sink: sink.clone(),
            prefs: Preferences {
                show_notifications: true,
                ..Preferences::default()
            },
        };

        view.refresh().await.unwrap();
        assert!(sink.0.lock().unwrap().is_empty(), "first cycle fires nothing");

        server.reset_async().await;
        server
            .mock("GET", mockito::Matcher::Regex("^/job/helios-main/api/json".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_body(failing)
            .create_async()
            .await;
        view.refresh().await.unwrap();

        let signals = sink.0.lock().unwrap();
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0], StreakSignal::Alarm { .. }));
    }
}
