//! Version identifiers for update entries
//!
//! A version is up to four numeric components (`major.minor.build.revision`),
//! an optional pre-release qualifier (`b<N>` for beta, `rc<N>` for release
//! candidate) and an optional `-SNAPSHOT` marker.
//!
//! Ordering compares the numeric components first, then the qualifier
//! (beta < release candidate < release) and finally the qualifier number.
//! The snapshot marker is informational and never takes part in ordering or
//! equality.

use crate::update::UpdateError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[allow(clippy::expect_used)] // Constant pattern, covered by tests
static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:\.(\d+))?(?:((?i:rc|b))(\d*))?((?i:-snapshot))?$",
    )
    .expect("version pattern must compile")
});

/// Pre-release qualifier of a [`Version`]
///
/// The declaration order is the ordering used when two versions share the
/// same numeric components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualifierKind {
    /// `b<N>`
    Beta,
    /// `rc<N>`
    ReleaseCandidate,
    /// No qualifier (final release)
    None,
}

impl QualifierKind {
    fn suffix(self) -> &'static str {
        match self {
            QualifierKind::Beta => "b",
            QualifierKind::ReleaseCandidate => "rc",
            QualifierKind::None => "",
        }
    }
}

/// A parsed, immutable version identifier
#[derive(Debug, Clone, Copy)]
pub struct Version {
    major: u32,
    minor: u32,
    build: u32,
    revision: u32,
    qualifier_kind: QualifierKind,
    qualifier_number: u32,
    snapshot: bool,
}

impl Version {
    /// The version carried by every initial (base schema) entry
    pub const INITIAL: Version = Version::new(0, 0);

    /// Create a release version from `major.minor`
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self::from_components(major, minor, 0, 0)
    }

    /// Create a release version from all four numeric components
    #[must_use]
    pub const fn from_components(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
            qualifier_kind: QualifierKind::None,
            qualifier_number: 0,
            snapshot: false,
        }
    }

    /// Return a copy of this version carrying a beta qualifier
    #[must_use]
    pub const fn beta(mut self, number: u32) -> Self {
        self.qualifier_kind = QualifierKind::Beta;
        self.qualifier_number = number;
        self
    }

    /// Return a copy of this version carrying a release-candidate qualifier
    #[must_use]
    pub const fn release_candidate(mut self, number: u32) -> Self {
        self.qualifier_kind = QualifierKind::ReleaseCandidate;
        self.qualifier_number = number;
        self
    }

    /// Return a copy of this version marked as a snapshot
    #[must_use]
    pub const fn snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }

    /// Parse a version string such as `1.2`, `3.0.0.1`, `1.2b1`, `2.0rc3`
    /// or `6.0.0-SNAPSHOT`.
    ///
    /// Missing numeric components default to 0 and a qualifier without a
    /// number counts as number 0. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns `UpdateError::Parse` if the string does not match the grammar
    /// or a component does not fit into a `u32`.
    pub fn parse(input: &str) -> Result<Self, UpdateError> {
        let trimmed = input.trim();
        let captures = VERSION_PATTERN.captures(trimmed).ok_or_else(|| UpdateError::Parse {
            input: input.to_string(),
            reason: "expected major[.minor[.build[.revision]]][bN|rcN][-SNAPSHOT]".to_string(),
        })?;

        let number = |index: usize| -> Result<u32, UpdateError> {
            match captures.get(index) {
                Some(m) if !m.as_str().is_empty() => {
                    m.as_str().parse::<u32>().map_err(|e| UpdateError::Parse {
                        input: input.to_string(),
                        reason: format!("component '{}' is not a valid number: {e}", m.as_str()),
                    })
                }
                _ => Ok(0),
            }
        };

        let qualifier_kind = match captures.get(5).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(q) if q == "b" => QualifierKind::Beta,
            Some(q) if q == "rc" => QualifierKind::ReleaseCandidate,
            _ => QualifierKind::None,
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            build: number(3)?,
            revision: number(4)?,
            qualifier_kind,
            qualifier_number: number(6)?,
            snapshot: captures.get(7).is_some(),
        })
    }

    #[must_use]
    pub fn major(&self) -> u32 {
        self.major
    }

    #[must_use]
    pub fn minor(&self) -> u32 {
        self.minor
    }

    #[must_use]
    pub fn build(&self) -> u32 {
        self.build
    }

    #[must_use]
    pub fn revision(&self) -> u32 {
        self.revision
    }

    #[must_use]
    pub fn qualifier_kind(&self) -> QualifierKind {
        self.qualifier_kind
    }

    #[must_use]
    pub fn qualifier_number(&self) -> u32 {
        self.qualifier_number
    }

    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    #[must_use]
    pub fn is_beta(&self) -> bool {
        self.qualifier_kind == QualifierKind::Beta
    }

    #[must_use]
    pub fn is_release_candidate(&self) -> bool {
        self.qualifier_kind == QualifierKind::ReleaseCandidate
    }

    /// True for a final release (no qualifier, not a snapshot)
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.qualifier_kind == QualifierKind::None && !self.snapshot
    }

    fn numeric(&self) -> (u32, u32, u32, u32) {
        (self.major, self.minor, self.build, self.revision)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numeric()
            .cmp(&other.numeric())
            .then(self.qualifier_kind.cmp(&other.qualifier_kind))
            .then(self.qualifier_number.cmp(&other.qualifier_number))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality follows ordering, so the snapshot flag is ignored here as well.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numeric().hash(state);
        self.qualifier_kind.hash(state);
        self.qualifier_number.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.build != 0 || self.revision != 0 {
            write!(f, ".{}", self.build)?;
        }
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        if self.qualifier_kind != QualifierKind::None {
            write!(f, "{}{}", self.qualifier_kind.suffix(), self.qualifier_number)?;
        }
        if self.snapshot {
            f.write_str("-SNAPSHOT")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<&str> for Version {
    type Error = UpdateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Version::parse(value)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn v(s: &str) -> Version {
        Version::parse(s).expect("version should parse")
    }

    #[test]
    fn test_parse_defaults_missing_components() {
        let version = v("7");
        assert_eq!((version.major(), version.minor(), version.build(), version.revision()), (7, 0, 0, 0));
        assert!(version.is_release());

        let version = v("1.2.3.4");
        assert_eq!((version.major(), version.minor(), version.build(), version.revision()), (1, 2, 3, 4));
    }

    #[test]
    fn test_parse_qualifiers_and_snapshot() {
        let beta = v("1.2b1");
        assert!(beta.is_beta());
        assert_eq!(beta.qualifier_number(), 1);
        assert!(!beta.is_snapshot());

        let rc = v("2.0rc3-SNAPSHOT");
        assert!(rc.is_release_candidate());
        assert_eq!(rc.qualifier_number(), 3);
        assert!(rc.is_snapshot());

        let snapshot = v("6.0.0-SNAPSHOT");
        assert!(snapshot.is_snapshot());
        assert_eq!(snapshot.qualifier_kind(), QualifierKind::None);
        assert!(!snapshot.is_release());

        let bare = v("4.1rc");
        assert!(bare.is_release_candidate());
        assert_eq!(bare.qualifier_number(), 0);
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        for input in ["", "abc", "1..2", "1.2.3.4.5", "1.2x", "1.2-beta", "-1.0", "99999999999.0"] {
            let result = Version::parse(input);
            assert!(matches!(result, Err(UpdateError::Parse { .. })), "should reject {input:?}");
        }
    }

    #[test]
    fn test_prerelease_ordering() {
        assert!(v("1.2b1") < v("1.2"));
        assert!(v("1.2rc1") < v("1.2"));
        assert!(v("1.2b1") < v("1.2rc1"));
        assert!(v("1.2b1") < v("1.2b2"));
        assert!(v("1.2rc9") < v("1.2.0.1b1"));
        assert!(v("1.10") > v("1.9"));
    }

    #[test]
    fn test_snapshot_does_not_affect_ordering() {
        assert_eq!(v("1.2-SNAPSHOT").cmp(&v("1.2")), Ordering::Equal);
        assert_eq!(v("1.2b1-SNAPSHOT"), v("1.2b1"));
        assert!(v("1.2b1-SNAPSHOT") < v("1.2"));
    }

    #[test]
    fn test_ordering_is_a_strict_total_order() {
        let samples: Vec<Version> = [
            "0.0", "1.0b1", "1.0b2", "1.0rc1", "1.0", "1.0-SNAPSHOT", "1.0.0.1", "1.1b1-SNAPSHOT",
            "1.1", "2.0rc2", "2.0rc10", "2.0", "10.0",
        ]
        .iter()
        .map(|s| v(s))
        .collect();

        for a in &samples {
            for b in &samples {
                let forward = a.cmp(b);
                assert_eq!(forward, b.cmp(a).reverse(), "antisymmetry for {a} / {b}");
                assert_eq!(forward == Ordering::Equal, a == b, "eq consistent for {a} / {b}");
                for c in &samples {
                    if a < b && b < c {
                        assert!(a < c, "transitivity for {a} < {b} < {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_display_trims_trailing_zero_components() {
        assert_eq!(v("6.0.0-SNAPSHOT").to_string(), "6.0-SNAPSHOT");
        assert_eq!(v("3.0.0.1").to_string(), "3.0.0.1");
        assert_eq!(v("3.5.0.0").to_string(), "3.5");
        assert_eq!(v("3.5.2").to_string(), "3.5.2");
        assert_eq!(v("2").to_string(), "2.0");
        assert_eq!(v("1.2b1").to_string(), "1.2b1");
        assert_eq!(v("1.2.0.0rc2-snapshot").to_string(), "1.2rc2-SNAPSHOT");
    }

    #[test]
    fn test_builder_constructors_match_parser() {
        assert_eq!(Version::new(1, 2).beta(1), v("1.2b1"));
        assert_eq!(Version::from_components(3, 0, 0, 1), v("3.0.0.1"));
        assert_eq!(Version::new(4, 0).release_candidate(2).snapshot().to_string(), "4.0rc2-SNAPSHOT");
        assert_eq!(Version::INITIAL.to_string(), "0.0");
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_serde_uses_canonical_string() {
        let json = serde_json::to_string(&v("3.5.0.0")).expect("serialize");
        assert_eq!(json, "\"3.5\"");
        let parsed: Version = serde_json::from_str("\"1.2rc1\"").expect("deserialize");
        assert!(parsed.is_release_candidate());
        assert!(serde_json::from_str::<Version>("\"nope\"").is_err());
    }
}
