mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::PhaseProgress;
pub use styling::{dim, magenta_bold};
pub use summary::{
    print_bench, print_correlation, print_fleet, print_report, print_snapshot,
};

/// Prints the `cipulse` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("📊 cipulse"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI Build Health Dashboard")
    );
}
