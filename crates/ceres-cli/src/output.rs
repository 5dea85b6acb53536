//! Plain-text rendering for the `stats`, `list` and `harvest` commands.

use std::fmt::Write;

use ceres_core::harvest::{HarvestReport, Termination};
use ceres_core::models::Dataset;
use ceres_core::stats::{GroupCount, StatsReport};

/// Renders the dashboard report as an aligned text block.
pub fn format_stats(report: &StatsReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nCatalog Statistics\n");
    let _ = writeln!(out, "  Total datasets:        {}", report.total_datasets);
    let _ = writeln!(out, "  Organizations:         {}", report.total_organizations);
    let _ = writeln!(out, "  Updated this month:    {}", report.recent_updates);
    let _ = writeln!(
        out,
        "  Public / private:      {} / {}",
        report.visibility.public, report.visibility.private
    );

    write_groups(&mut out, "Top organizations", &report.top_organizations);
    write_groups(&mut out, "By state", &report.by_state);
    write_groups(&mut out, "By license", &report.by_license);

    let _ = writeln!(out, "\n  Created per month");
    for month in &report.monthly_creations {
        let _ = writeln!(out, "    {}  {:>6}", month.label, month.count);
    }

    let _ = writeln!(out, "\n  Days since last update");
    for bucket in &report.age_histogram {
        let _ = writeln!(out, "    {:<8} {:>6}", bucket.label, bucket.count);
    }
    out
}

fn write_groups(out: &mut String, heading: &str, groups: &[GroupCount]) {
    let _ = writeln!(out, "\n  {}", heading);
    for group in groups {
        let _ = writeln!(out, "    {:>6}  {}", group.count, group.key);
    }
}

/// One line per dataset: id, modification date, title.
pub fn format_dataset_line(dataset: &Dataset) -> String {
    let modified = dataset
        .metadata_modified
        .map(|m| m.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "----------".to_string());
    format!(
        "{}  {}  {}",
        dataset.ckan_id,
        modified,
        truncate_text(&dataset.title, 80)
    )
}

/// End-of-run summary printed after `harvest` / `bootstrap`.
pub fn format_harvest_summary(report: &HarvestReport) -> String {
    let stats = &report.stats;
    let status = match &report.termination {
        Termination::Exhausted => "complete".to_string(),
        Termination::EarlyStop(error) => format!("stopped early ({})", error),
    };
    format!(
        "Harvest {}: {} record(s) over {} page(s): {} created, {} updated, {} unchanged, {} skipped, {} failed; resources: {} created, {} updated, {} pruned, {} skipped (no url)",
        status,
        report.records_seen,
        report.pages_fetched,
        stats.created,
        stats.updated,
        stats.unchanged,
        stats.skipped,
        stats.failed,
        stats.resources_created,
        stats.resources_updated,
        stats.resources_pruned,
        stats.resources_skipped
    )
}

/// Collapse whitespace and truncate to `max_chars` characters, adding an ellipsis.
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() <= max_chars {
        cleaned
    } else {
        let head: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
