//! Human-readable run statistics
//!
//! Used by the `--stats` mode of the binary.

use crate::output::OutcomeSummary;
use crate::storage::RunId;

/// Prints a run summary to stdout in a formatted manner
pub fn print_statistics(run: RunId, summary: &OutcomeSummary) {
    println!("=== Harvest Statistics ===\n");

    println!("Run: {} (created {})", run, run.created_at().to_rfc3339());
    println!("  Entities: {}", summary.total);
    println!();

    println!("Entities by State:");
    for (label, count) in [
        ("succeeded", summary.succeeded),
        ("pending", summary.pending),
        ("failed (retryable)", summary.retryable),
        ("failed (permanent)", summary.permanently_failed),
    ] {
        println!("  {}: {} ({:.1}%)", label, count, percentage(count, summary.total));
    }
    println!();

    println!(
        "Permanent failure ratio: {:.2}%",
        summary.permanent_failure_ratio * 100.0
    );
    println!(
        "Complete: {}",
        if summary.complete { "yes" } else { "no" }
    );
    println!(
        "Outcome: {}",
        if summary.outcome.is_success() {
            "success"
        } else {
            "failure (threshold exceeded)"
        }
    );
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (count as f64 / total as f64) * 100.0
    }
}
