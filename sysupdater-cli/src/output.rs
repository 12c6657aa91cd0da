//! Report rendering for the terminal

use colored::Colorize;
use sysupdater::update::{EntryReport, PrecheckStatus, RunStatus, UpdateReport};

/// Status column for one entry
pub fn status_label(entry: &EntryReport) -> String {
    match (entry.precheck, entry.run) {
        (_, RunStatus::Success) => "applied".to_string(),
        (_, RunStatus::Failed) => "failed".to_string(),
        (PrecheckStatus::AlreadyUpdated, _) => "up to date".to_string(),
        (PrecheckStatus::Error, _) => "precheck error".to_string(),
        (PrecheckStatus::ReadyForUpdate, _) if entry.skipped => "skipped".to_string(),
        (PrecheckStatus::ReadyForUpdate, _) => "pending".to_string(),
        (PrecheckStatus::Unchecked, _) => "unchecked".to_string(),
    }
}

/// Plain-text report, one line per entry plus a summary
pub fn render_report(report: &UpdateReport) -> String {
    let mut out = String::new();
    let mut current_region: Option<&str> = None;
    for entry in &report.entries {
        if current_region != Some(entry.region.as_str()) {
            out.push_str(&format!("\n{}\n", entry.region.bold()));
            current_region = Some(entry.region.as_str());
        }
        let version = if entry.initial {
            "initial".to_string()
        } else {
            entry.version.clone()
        };
        let label = status_label(entry);
        let colored_label = match label.as_str() {
            "applied" | "up to date" => label.green(),
            "failed" | "precheck error" => label.red(),
            "skipped" | "pending" => label.yellow(),
            _ => label.normal(),
        };
        out.push_str(&format!(
            "  {:<12} {:<16} {}",
            version, colored_label, entry.description
        ));
        if let Some(ms) = entry.duration_ms {
            out.push_str(&format!(" ({ms}ms)"));
        }
        out.push('\n');
        if let Some(message) = &entry.message {
            out.push_str(&format!("      {}\n", message.dimmed()));
        }
    }

    out.push_str(&format!(
        "\n📈 Summary: {} total, {} applied, {} up to date, {} failed, {} precheck error(s), {} skipped, {} pending\n",
        report.total(),
        report.succeeded(),
        report.already_updated(),
        report.failed(),
        report.precheck_errors(),
        report.skipped(),
        report.pending()
    ));
    out
}

pub fn print_report(report: &UpdateReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", render_report(report));
    }
    Ok(())
}
