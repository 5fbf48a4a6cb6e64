use comfy_table::Cell;

use crate::correlation::CorrelationMatrix;
use crate::model::{JobIdentity, TriggerKind};
use crate::perf::BenchmarkSeries;
use crate::report::TestReportSummary;
use crate::snapshot::{FleetSnapshot, Snapshot};

use super::styling::{bright, bright_red, dim};
use super::tables::{create_table, outcome_cell, streak_cell, verdict_cell};

fn trigger_label(trigger: TriggerKind) -> &'static str {
    match trigger {
        TriggerKind::ManualRebuild => "rebuild",
        TriggerKind::PullRequest => "pull-request",
        TriggerKind::Push => "push",
    }
}

/// Prints the build-history grid: one row per build, one column per known
/// job, plus the alarming-streak table when anything is alarming.
pub fn print_snapshot(snapshot: &Snapshot) {
    let mut table = create_table();

    let mut header = vec![
        Cell::new("Build"),
        Cell::new("Trigger"),
        Cell::new("Commit"),
        Cell::new("Cost"),
    ];
    header.extend(snapshot.columns.iter().map(|id| Cell::new(id.as_str())));
    table.set_header(header);

    for (build, cost) in snapshot.builds.iter().zip(&snapshot.build_costs) {
        let commit = build
            .commits
            .first()
            .map(|c| format!("{:.9} {}", c.id, c.short_message()))
            .unwrap_or_default();

        let mut row = vec![
            Cell::new(format!("#{}", build.number)),
            Cell::new(trigger_label(build.trigger)),
            Cell::new(commit),
            Cell::new(cost.to_string()),
        ];
        row.extend(
            snapshot
                .columns
                .iter()
                .map(|id| outcome_cell(build.result_for(id).map(|sub| sub.outcome))),
        );
        table.add_row(row);
    }

    println!("{table}");
    println!(
        "{} builds, {} columns, total cost {}",
        snapshot.builds.len(),
        snapshot.columns.len(),
        bright(snapshot.total_cost)
    );

    if !snapshot.streaks.is_empty() {
        print_streaks(&snapshot.streaks);
    }
}

fn print_streaks(streaks: &crate::streaks::StreakMap) {
    eprintln!("\n{}", bright_red("Alarming jobs"));
    let mut table = create_table();
    table.set_header(vec!["Job", "Consecutive failures"]);
    for (job, &count) in streaks {
        table.add_row(vec![Cell::new(job.as_str()), streak_cell(count)]);
    }
    println!("{table}");
}

/// Prints queue, machine utilization and fleet cost projection.
pub fn print_fleet(snapshot: &FleetSnapshot) {
    let mut table = create_table();
    table.set_header(vec!["Node class", "Busy", "Idle", "Rate (c/h)"]);
    for (class, util) in &snapshot.cost.per_class {
        table.add_row(vec![
            Cell::new(class),
            Cell::new(util.busy.to_string()),
            Cell::new(util.idle.to_string()),
            Cell::new(
                util.hourly_cents
                    .map_or_else(|| "?".to_string(), |c| c.to_string()),
            ),
        ]);
    }
    println!("{table}");

    println!(
        "Hourly {}, projected monthly {}",
        bright(snapshot.cost.hourly),
        bright(snapshot.cost.monthly)
    );

    if snapshot.queue.is_empty() {
        println!("{}", dim("Queue is empty"));
    } else {
        let mut queue = create_table();
        queue.set_header(vec!["Queued task", "Reason"]);
        for entry in &snapshot.queue {
            queue.add_row(vec![entry.task.as_str(), entry.reason.as_str()]);
        }
        println!("{queue}");
    }
}

/// Prints per-class test counters followed by the failure list.
pub fn print_report(summary: &TestReportSummary) {
    let mut table = create_table();
    table.set_header(vec!["File", "Class", "Cases", "Passed", "Error", "Skipped", "Time (s)"]);
    for ((file, class), counters) in &summary.classes {
        table.add_row(vec![
            Cell::new(file),
            Cell::new(class),
            Cell::new(counters.cases.to_string()),
            Cell::new(counters.passed.to_string()),
            Cell::new(counters.error.to_string()),
            Cell::new(counters.skipped.to_string()),
            Cell::new(format!("{:.2}", counters.time_secs)),
        ]);
    }
    println!("{table}");
    println!(
        "{} files, {} classes, {} cases",
        summary.total_files, summary.total_classes, summary.total_cases
    );

    if !summary.failures.is_empty() {
        eprintln!("\n{}", bright_red("Failures"));
        for failure in &summary.failures {
            println!("{} :: {}", failure.classname, failure.name);
            if !failure.text.is_empty() {
                println!("{}", dim(&failure.text));
            }
        }
    }
}

/// Prints the benchmark regression grid: one row per run, one column per
/// baseline benchmark. Missing cells stay blank.
pub fn print_bench(series: &BenchmarkSeries) {
    let names: Vec<&str> = series.benchmark_names().collect();

    let mut table = create_table();
    let mut header = vec![Cell::new("Run")];
    header.extend(names.iter().map(|name| Cell::new(*name)));
    table.set_header(header);

    for run in series.runs() {
        let mut row = vec![Cell::new(&run.label)];
        row.extend(names.iter().map(|name| {
            run.cells
                .get(*name)
                .map_or_else(|| Cell::new(""), |cell| verdict_cell(cell.verdict, cell.diff))
        }));
        table.add_row(row);
    }

    println!("{table}");
    if let Some(baseline) = series.baseline_label() {
        println!("{}", dim(format!("Baseline: {baseline}")));
    }
}

/// Prints the failure co-occurrence matrix.
pub fn print_correlation(matrix: &CorrelationMatrix) {
    if matrix.is_empty() {
        println!("{}", dim("No failures in the inspected history"));
        return;
    }

    let mut table = create_table();
    let mut header = vec![Cell::new("")];
    header.extend(matrix.jobs.iter().map(Cell::new));
    table.set_header(header);

    for (i, job) in matrix.jobs.iter().enumerate() {
        let mut row = vec![Cell::new(job)];
        row.extend(matrix.counts[i].iter().map(|count| {
            if *count == 0 {
                Cell::new("")
            } else {
                Cell::new(count.to_string())
            }
        }));
        table.add_row(row);
    }

    println!("{table}");
}
