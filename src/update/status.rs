//! Update status reporting
//!
//! [`UpdateReport`] is what the bootstrap code and the administration view
//! receive after a precheck or run: one row per registered entry plus
//! aggregate counts.

use crate::update::{PrecheckStatus, RunStatus, UpdateEntry};
use serde::Serialize;

/// Status of one entry after a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub region: String,
    pub version: String,
    pub description: String,
    pub initial: bool,
    pub date: Option<String>,
    pub precheck: PrecheckStatus,
    pub run: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Held back by an earlier failure in its region or a failed dependency
    pub skipped: bool,
}

impl From<&UpdateEntry> for EntryReport {
    fn from(entry: &UpdateEntry) -> Self {
        Self {
            region: entry.region_id().to_string(),
            version: entry.version().to_string(),
            description: entry.description().to_string(),
            initial: entry.is_initial(),
            date: entry.iso_date().map(|d| d.to_string()),
            precheck: entry.precheck_status(),
            run: entry.run_status(),
            message: entry.message().map(str::to_string),
            duration_ms: entry
                .duration()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            skipped: entry.is_skipped(),
        }
    }
}

impl EntryReport {
    /// Not executed because an earlier entry or a dependency region did not
    /// complete
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Ready for update and not yet executed, e.g. after a precheck-only pass
    pub fn is_pending(&self) -> bool {
        self.precheck == PrecheckStatus::ReadyForUpdate
            && self.run == RunStatus::NotRun
            && !self.skipped
    }
}

/// Summary of a precheck or run pass, in execution order
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub entries: Vec<EntryReport>,
}

impl UpdateReport {
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a UpdateEntry>,
    {
        Self {
            entries: entries.into_iter().map(EntryReport::from).collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn count_precheck(&self, status: PrecheckStatus) -> usize {
        self.entries.iter().filter(|e| e.precheck == status).count()
    }

    pub fn count_run(&self, status: RunStatus) -> usize {
        self.entries.iter().filter(|e| e.run == status).count()
    }

    pub fn already_updated(&self) -> usize {
        self.count_precheck(PrecheckStatus::AlreadyUpdated)
    }

    pub fn succeeded(&self) -> usize {
        self.count_run(RunStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count_run(RunStatus::Failed)
    }

    pub fn precheck_errors(&self) -> usize {
        self.count_precheck(PrecheckStatus::Error)
    }

    pub fn skipped(&self) -> usize {
        self.entries.iter().filter(|e| e.is_skipped()).count()
    }

    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// Entries of one region
    pub fn region<'a>(&'a self, region: &'a str) -> impl Iterator<Item = &'a EntryReport> + 'a {
        self.entries.iter().filter(move |e| e.region == region)
    }

    /// True when any entry failed or could not be prechecked
    ///
    /// Startup should not serve traffic against a schema in that state;
    /// acting on it is up to the caller.
    pub fn should_abort_startup(&self) -> bool {
        self.failed() > 0 || self.precheck_errors() > 0
    }

    /// True when every entry's effect was already present
    pub fn is_up_to_date(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.precheck == PrecheckStatus::AlreadyUpdated)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report() -> UpdateReport {
        let mut done = UpdateEntry::initial("core", "2024-01-01", "Base");
        done.set_precheck(PrecheckStatus::AlreadyUpdated, None);

        let mut ran = UpdateEntry::with_version("core", crate::update::Version::new(1, 1), "2024-02-01", "Add column");
        ran.set_precheck(PrecheckStatus::ReadyForUpdate, None);
        ran.set_run(RunStatus::Success, Duration::from_millis(12), None);

        let mut failed = UpdateEntry::initial("crm", "2024-01-01", "Base");
        failed.set_precheck(PrecheckStatus::ReadyForUpdate, None);
        failed.set_run(RunStatus::Failed, Duration::from_millis(3), Some("syntax error".to_string()));

        let mut skipped = UpdateEntry::with_version("crm", crate::update::Version::new(1, 0), "2024-02-01", "Later");
        skipped.set_precheck(PrecheckStatus::ReadyForUpdate, None);
        skipped.mark_skipped("skipped: crm@initial did not complete");

        let mut pending = UpdateEntry::with_version("billing", crate::update::Version::new(1, 0), "2024-02-01", "Invoices");
        pending.set_precheck(PrecheckStatus::ReadyForUpdate, None);

        UpdateReport::from_entries([&done, &ran, &failed, &skipped, &pending])
    }

    #[test]
    fn test_counts() {
        let report = report();
        assert_eq!(report.total(), 5);
        assert_eq!(report.already_updated(), 1);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.pending(), 1);
        assert_eq!(report.precheck_errors(), 0);
        assert_eq!(report.region("crm").count(), 2);
        assert!(report.should_abort_startup());
        assert!(!report.is_up_to_date());
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_json_output() {
        let json = report().to_json().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        let first = &value["entries"][0];
        assert_eq!(first["region"], "core");
        assert_eq!(first["version"], "0.0");
        assert_eq!(first["precheck"], "AlreadyUpdated");
        assert_eq!(first["run"], "NotRun");
        assert!(first.get("message").is_none());
        assert_eq!(value["entries"][1]["duration_ms"], 12);
        assert_eq!(value["entries"][2]["message"], "syntax error");
    }

    #[test]
    fn test_pending_entries_are_not_counted_as_skipped() {
        let mut entry = UpdateEntry::initial("core", "2024-01-01", "Base");
        entry.set_precheck(PrecheckStatus::ReadyForUpdate, None);
        let report = UpdateReport::from_entries([&entry]);
        assert_eq!(report.pending(), 1);
        assert_eq!(report.skipped(), 0);
        assert!(!report.should_abort_startup());
    }

    #[test]
    fn test_empty_report_does_not_abort() {
        let report = UpdateReport::default();
        assert!(!report.should_abort_startup());
        assert!(report.is_up_to_date());
    }
}
