use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::perf::Verdict;
use crate::status::Outcome;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn outcome_cell(outcome: Option<Outcome>) -> Cell {
    match outcome {
        Some(Outcome::Success) => Cell::new("✓").fg(TableColor::Green),
        Some(Outcome::Failure) => Cell::new("✗").fg(TableColor::Red),
        Some(Outcome::Aborted) => Cell::new("–").fg(TableColor::DarkGrey),
        Some(Outcome::Pending) => Cell::new("…").fg(TableColor::Yellow),
        Some(Outcome::Skipped) => Cell::new("»").fg(TableColor::DarkGrey),
        Some(Outcome::InfraFailure) => Cell::new("!").fg(TableColor::Magenta),
        None => Cell::new(""),
    }
}

pub fn verdict_cell(verdict: Verdict, diff: f64) -> Cell {
    let text = format!("{:+.1}%", diff * 100.0);
    match verdict {
        Verdict::Regressed => Cell::new(text).fg(TableColor::Red),
        Verdict::Optimized => Cell::new(text).fg(TableColor::Green),
        Verdict::Stable => Cell::new(text),
    }
}

pub fn streak_cell(count: u32) -> Cell {
    if count > 1 {
        Cell::new(format!("{count} ⚠")).fg(TableColor::Red)
    } else {
        Cell::new(count.to_string())
    }
}
