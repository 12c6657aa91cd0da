//! Contribution interface used by module activation
//!
//! Each module that owns schema implements [`UpdateContributor`]. At startup
//! the activation code passes every contributor to
//! [`UpdateRegistry::register_contributor`], once per module per process.

use crate::update::{UpdateError, UpdateRegistry, UpdateUnit};

/// A schema-owning module
pub trait UpdateContributor {
    /// Region the contributor's entries belong to
    fn region_id(&self) -> &str;

    /// The single entry creating the region's base schema, if any
    ///
    /// Must be built with [`UpdateEntry::initial`](crate::update::UpdateEntry::initial).
    fn initialization_update(&self) -> Option<UpdateUnit>;

    /// Subsequent versioned entries
    ///
    /// Must be built with [`UpdateEntry::versioned`](crate::update::UpdateEntry::versioned).
    fn updates(&self) -> Vec<UpdateUnit>;

    /// Regions whose updates must run before this region's
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Result of registering one contributor
#[derive(Debug, Default)]
pub struct ContributionOutcome {
    pub region_id: String,
    pub accepted: usize,
    pub rejected: Vec<UpdateError>,
}

impl ContributionOutcome {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl UpdateRegistry {
    /// Register everything a contributor declares
    ///
    /// Units are checked against the role they were contributed under: an
    /// initial entry delivered through [`UpdateContributor::updates`], a
    /// versioned entry delivered as the initialization update, or an entry for
    /// a foreign region is a caller contract violation. Such units are logged
    /// and rejected, as are the usual registration conflicts. Dependency
    /// edges are declared after the entries.
    pub fn register_contributor(&mut self, contributor: &dyn UpdateContributor) -> ContributionOutcome {
        let region_id = contributor.region_id().to_string();
        let mut outcome = ContributionOutcome {
            region_id: region_id.clone(),
            ..ContributionOutcome::default()
        };

        let initial = contributor.initialization_update().map(|unit| (unit, true));
        let versioned = contributor.updates().into_iter().map(|unit| (unit, false));

        for (unit, expect_initial) in initial.into_iter().chain(versioned) {
            let result = check_role(&region_id, &unit, expect_initial)
                .and_then(|()| self.register_unit(unit));
            match result {
                Ok(()) => outcome.accepted += 1,
                Err(e) => outcome.rejected.push(e),
            }
        }

        for dependency in contributor.depends_on() {
            if let Err(e) = self.declare_dependency(&region_id, &dependency) {
                outcome.rejected.push(e);
            }
        }

        if outcome.is_clean() {
            log::info!(
                "Region '{}' contributed {} update(s)",
                region_id,
                outcome.accepted
            );
        } else {
            log::warn!(
                "Region '{}' contributed {} update(s), {} rejected",
                region_id,
                outcome.accepted,
                outcome.rejected.len()
            );
        }
        outcome
    }
}

fn check_role(region_id: &str, unit: &UpdateUnit, expect_initial: bool) -> Result<(), UpdateError> {
    let entry = &unit.entry;
    let reason = if entry.region_id() != region_id {
        Some(format!("entry belongs to region '{}'", entry.region_id()))
    } else if expect_initial && !entry.is_initial() {
        Some("initialization update is not an initial entry".to_string())
    } else if !expect_initial && entry.is_initial() {
        Some("versioned update list contains an initial entry".to_string())
    } else {
        None
    };

    match reason {
        None => Ok(()),
        Some(reason) => {
            log::error!(
                "Contract violation in region '{}' for update {}: {}",
                region_id,
                entry.label(),
                reason
            );
            Err(UpdateError::RegistrationConflict {
                region_id: region_id.to_string(),
                version: entry.version().to_string(),
                reason,
            })
        }
    }
}
