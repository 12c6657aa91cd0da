//! Update entry data model
//!
//! An [`UpdateEntry`] is plain data: the owning region, the target version,
//! an ISO creation date, a description and the status fields written by the
//! updater during a run. The logic that detects and applies the update is
//! registered alongside it as an [`UpdateAction`](crate::update::UpdateAction).

use crate::update::{UpdateError, Version};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Date format accepted for entry creation dates (UTC calendar date)
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Outcome of the precheck phase for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrecheckStatus {
    /// Not prechecked in this run yet
    Unchecked,
    /// The effect is missing; the entry will run
    ReadyForUpdate,
    /// The effect is already present in the live schema
    AlreadyUpdated,
    /// Introspection failed or timed out
    Error,
}

impl PrecheckStatus {
    /// String form used in reports; empty while unset
    pub fn as_str(self) -> &'static str {
        match self {
            PrecheckStatus::Unchecked => "",
            PrecheckStatus::ReadyForUpdate => "ReadyForUpdate",
            PrecheckStatus::AlreadyUpdated => "AlreadyUpdated",
            PrecheckStatus::Error => "Error",
        }
    }
}

impl fmt::Display for PrecheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the run phase for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunStatus {
    NotRun,
    Success,
    Failed,
}

impl RunStatus {
    /// String form used in reports; empty while unset
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::NotRun => "",
            RunStatus::Success => "Success",
            RunStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schema-change unit of a region
#[derive(Debug, Clone)]
pub struct UpdateEntry {
    region_id: String,
    version: Version,
    iso_date: Option<NaiveDate>,
    description: String,
    initial: bool,
    precheck_status: PrecheckStatus,
    run_status: RunStatus,
    message: Option<String>,
    duration: Option<Duration>,
    skipped: bool,
}

impl UpdateEntry {
    /// The entry that creates a region's base schema
    ///
    /// Its version is always [`Version::INITIAL`] and it is ordered first in
    /// its region regardless of any other entry.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sysupdater::update::UpdateEntry;
    ///
    /// let entry = UpdateEntry::initial("billing", "2024-03-01", "Base billing schema");
    /// assert!(entry.is_initial());
    /// assert_eq!(entry.version().to_string(), "0.0");
    /// ```
    pub fn initial(
        region_id: impl Into<String>,
        iso_date: &str,
        description: impl Into<String>,
    ) -> Self {
        let region_id = region_id.into();
        let iso_date = parse_iso_date(&region_id, iso_date);
        Self::build(region_id, Version::INITIAL, iso_date, description.into(), true)
    }

    /// A regular update targeting `version`
    ///
    /// # Errors
    ///
    /// Returns `UpdateError::Parse` if `version` is not a valid version string.
    /// A malformed `iso_date` does not fail construction: it is logged and the
    /// entry carries no date.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sysupdater::update::UpdateEntry;
    ///
    /// let entry = UpdateEntry::versioned("billing", "2.1rc1", "2024-05-10", "Invoice numbers").unwrap();
    /// assert!(!entry.is_initial());
    /// assert!(entry.version().is_release_candidate());
    /// ```
    pub fn versioned(
        region_id: impl Into<String>,
        version: &str,
        iso_date: &str,
        description: impl Into<String>,
    ) -> Result<Self, UpdateError> {
        let region_id = region_id.into();
        let version = Version::parse(version).map_err(|e| {
            log::error!("Update entry of region '{}' has an invalid version: {}", region_id, e);
            e
        })?;
        let iso_date = parse_iso_date(&region_id, iso_date);
        Ok(Self::build(region_id, version, iso_date, description.into(), false))
    }

    /// A regular update from an already parsed version
    pub fn with_version(
        region_id: impl Into<String>,
        version: Version,
        iso_date: &str,
        description: impl Into<String>,
    ) -> Self {
        let region_id = region_id.into();
        let iso_date = parse_iso_date(&region_id, iso_date);
        Self::build(region_id, version, iso_date, description.into(), false)
    }

    fn build(
        region_id: String,
        version: Version,
        iso_date: Option<NaiveDate>,
        description: String,
        initial: bool,
    ) -> Self {
        Self {
            region_id,
            version,
            iso_date,
            description,
            initial,
            precheck_status: PrecheckStatus::Unchecked,
            run_status: RunStatus::NotRun,
            message: None,
            duration: None,
            skipped: false,
        }
    }

    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Creation date, `None` if the declared date was not a valid ISO date
    pub fn iso_date(&self) -> Option<NaiveDate> {
        self.iso_date
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn precheck_status(&self) -> PrecheckStatus {
        self.precheck_status
    }

    pub fn run_status(&self) -> RunStatus {
        self.run_status
    }

    /// Precheck status as a string, empty while unchecked
    pub fn precheck_result(&self) -> String {
        self.precheck_status.as_str().to_string()
    }

    /// Run status as a string, empty while not run
    pub fn running_result(&self) -> String {
        self.run_status.as_str().to_string()
    }

    /// Diagnostic message of the last failure or timeout
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Held back in the last run because an earlier entry of its region or
    /// a dependency region did not complete
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Wall time of the last run phase execution
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// `region@version` label used in logs
    pub fn label(&self) -> String {
        if self.initial {
            format!("{}@initial", self.region_id)
        } else {
            format!("{}@{}", self.region_id, self.version)
        }
    }

    pub(crate) fn reset_status(&mut self) {
        self.precheck_status = PrecheckStatus::Unchecked;
        self.run_status = RunStatus::NotRun;
        self.message = None;
        self.duration = None;
        self.skipped = false;
    }

    pub(crate) fn set_precheck(&mut self, status: PrecheckStatus, message: Option<String>) {
        self.precheck_status = status;
        if message.is_some() {
            self.message = message;
        }
    }

    pub(crate) fn set_run(&mut self, status: RunStatus, duration: Duration, message: Option<String>) {
        self.run_status = status;
        self.duration = Some(duration);
        if message.is_some() {
            self.message = message;
        }
    }

    pub(crate) fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.skipped = true;
        self.message = Some(reason.into());
    }
}

impl fmt::Display for UpdateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.description)
    }
}

fn parse_iso_date(region_id: &str, iso_date: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(iso_date.trim(), ISO_DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            log::warn!(
                "Update entry of region '{}' has an invalid date '{}' (expected yyyy-MM-dd): {}",
                region_id,
                iso_date,
                e
            );
            None
        }
    }
}
