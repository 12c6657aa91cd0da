//! Region registry
//!
//! The registry maps each region to its ordered list of update units. It is
//! an explicit object created by the bootstrap code, filled by contributors
//! and handed to [`SystemUpdater`](crate::update::SystemUpdater).
//!
//! Ordering rules:
//! - inside a region the initial entry (if any) comes first, then the other
//!   entries by ascending [`Version`](crate::update::Version)
//! - regions keep their registration order, adjusted only by declared
//!   dependency edges (a region runs after every region it depends on)

use crate::update::{UpdateAction, UpdateEntry, UpdateError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// An update entry paired with the action that applies it
#[derive(Clone)]
pub struct UpdateUnit {
    pub entry: UpdateEntry,
    pub action: Arc<dyn UpdateAction>,
}

impl UpdateUnit {
    pub fn new(entry: UpdateEntry, action: impl UpdateAction + 'static) -> Self {
        Self {
            entry,
            action: Arc::new(action),
        }
    }

    pub fn from_shared(entry: UpdateEntry, action: Arc<dyn UpdateAction>) -> Self {
        Self { entry, action }
    }
}

impl fmt::Debug for UpdateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateUnit")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Region {
    pub(crate) id: String,
    pub(crate) units: Vec<UpdateUnit>,
    pub(crate) depends_on: Vec<String>,
}

impl Region {
    fn new(id: String) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    fn has_initial(&self) -> bool {
        self.units.first().is_some_and(|u| u.entry.is_initial())
    }
}

/// Region-id to ordered update units
#[derive(Debug, Default)]
pub struct UpdateRegistry {
    regions: Vec<Region>,
    index: HashMap<String, usize>,
    strict_dates: bool,
}

impl UpdateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject entries whose creation date is missing or malformed
    #[must_use]
    pub fn with_strict_dates(mut self, strict_dates: bool) -> Self {
        self.strict_dates = strict_dates;
        self
    }

    pub fn strict_dates(&self) -> bool {
        self.strict_dates
    }

    /// Register one entry with its action
    ///
    /// The entry is inserted at its ordered position inside its region. The
    /// region is created on first use and keeps its registration position.
    ///
    /// # Errors
    ///
    /// Returns `UpdateError::RegistrationConflict` (and logs it) when:
    /// - the region already has an initial entry and `entry` is initial too
    /// - the region already has an entry with the same version
    /// - strict dates are enabled and `entry` has no valid date
    ///
    /// Returns `UpdateError::InvalidInput` when the action fails validation.
    /// A rejected entry leaves the registry unchanged.
    pub fn register(
        &mut self,
        entry: UpdateEntry,
        action: Arc<dyn UpdateAction>,
    ) -> Result<(), UpdateError> {
        if let Err(e) = action.validate() {
            log::error!("Rejected update {}: {}", entry.label(), e);
            return Err(e);
        }
        if self.strict_dates && entry.iso_date().is_none() {
            return Err(conflict(&entry, "creation date is missing or not yyyy-MM-dd"));
        }

        let position = match self.index.get(entry.region_id()) {
            Some(&idx) => Self::insert_position(&self.regions[idx], &entry)?,
            None => 0,
        };

        let idx = self.region_index_or_insert(entry.region_id());
        log::debug!("Registered update {}", entry.label());
        self.regions[idx]
            .units
            .insert(position, UpdateUnit::from_shared(entry, action));
        Ok(())
    }

    /// Register a prepared unit
    pub fn register_unit(&mut self, unit: UpdateUnit) -> Result<(), UpdateError> {
        self.register(unit.entry, unit.action)
    }

    /// Register several units, returning the rejected ones' errors
    ///
    /// Every unit is attempted; a rejection never stops the others.
    pub fn register_all<I>(&mut self, units: I) -> Vec<UpdateError>
    where
        I: IntoIterator<Item = UpdateUnit>,
    {
        units
            .into_iter()
            .filter_map(|unit| self.register_unit(unit).err())
            .collect()
    }

    /// Declare that `region` must run after `depends_on`
    ///
    /// Both regions are created (empty) if they are not registered yet.
    ///
    /// # Errors
    ///
    /// - `UpdateError::InvalidInput` for a self-dependency
    /// - `UpdateError::DependencyCycle` if the edge would close a cycle; the
    ///   edge is not added
    pub fn declare_dependency(&mut self, region: &str, depends_on: &str) -> Result<(), UpdateError> {
        if region == depends_on {
            return Err(UpdateError::InvalidInput(format!(
                "region '{region}' cannot depend on itself"
            )));
        }

        if let Some(path) = self.dependency_path(depends_on, region) {
            let mut regions = path;
            regions.push(depends_on.to_string());
            log::error!(
                "Rejected dependency '{}' -> '{}': cycle through {}",
                region,
                depends_on,
                regions.join(" -> ")
            );
            return Err(UpdateError::DependencyCycle { regions });
        }

        self.region_index_or_insert(depends_on);
        let idx = self.region_index_or_insert(region);
        let deps = &mut self.regions[idx].depends_on;
        if !deps.iter().any(|d| d == depends_on) {
            deps.push(depends_on.to_string());
        }
        Ok(())
    }

    /// Region ids in registration order
    pub fn region_ids(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.id.as_str()).collect()
    }

    /// Ordered entries of one region
    pub fn region_entries(&self, region: &str) -> Option<Vec<&UpdateEntry>> {
        self.index
            .get(region)
            .map(|&idx| self.regions[idx].units.iter().map(|u| &u.entry).collect())
    }

    /// Regions `region` was declared to depend on
    pub fn dependencies(&self, region: &str) -> &[String] {
        self.index
            .get(region)
            .map_or(&[], |&idx| self.regions[idx].depends_on.as_slice())
    }

    /// Number of registered entries across all regions
    pub fn len(&self) -> usize {
        self.regions.iter().map(|r| r.units.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry in execution order
    pub fn execution_order(&self) -> Vec<&UpdateEntry> {
        self.region_order()
            .into_iter()
            .flat_map(|idx| self.regions[idx].units.iter().map(|u| &u.entry))
            .collect()
    }

    pub(crate) fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub(crate) fn regions_mut(&mut self) -> &mut [Region] {
        &mut self.regions
    }

    pub(crate) fn region_position(&self, region: &str) -> Option<usize> {
        self.index.get(region).copied()
    }

    /// Region indices, dependencies first, otherwise registration order
    ///
    /// Kahn's algorithm always picking the earliest-registered ready region,
    /// so the result equals registration order when no edges are declared.
    pub(crate) fn region_order(&self) -> Vec<usize> {
        let count = self.regions.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (idx, region) in self.regions.iter().enumerate() {
            for dep in &region.depends_on {
                if let Some(&dep_idx) = self.index.get(dep) {
                    in_degree[idx] += 1;
                    dependents[dep_idx].push(idx);
                }
            }
        }

        let mut ready: Vec<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while !ready.is_empty() {
            // `ready` is kept sorted descending so pop() yields the smallest index
            ready.sort_unstable_by(|a, b| b.cmp(a));
            let Some(current) = ready.pop() else { break };
            order.push(current);
            for &dependent in &dependents[current] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }
        order
    }

    /// Region indices grouped into waves whose members share no dependency
    ///
    /// A region's wave is one past the highest wave of its dependencies.
    pub(crate) fn region_waves(&self) -> Vec<Vec<usize>> {
        let mut level = vec![0usize; self.regions.len()];
        for idx in self.region_order() {
            level[idx] = self.regions[idx]
                .depends_on
                .iter()
                .filter_map(|dep| self.index.get(dep))
                .map(|&dep_idx| level[dep_idx] + 1)
                .max()
                .unwrap_or(0);
        }

        let depth = level.iter().copied().max().map_or(0, |m| m + 1);
        let mut waves = vec![Vec::new(); depth];
        for (idx, &l) in level.iter().enumerate() {
            waves[l].push(idx);
        }
        waves
    }

    fn region_index_or_insert(&mut self, region: &str) -> usize {
        if let Some(&idx) = self.index.get(region) {
            return idx;
        }
        let idx = self.regions.len();
        self.regions.push(Region::new(region.to_string()));
        self.index.insert(region.to_string(), idx);
        idx
    }

    fn insert_position(region: &Region, entry: &UpdateEntry) -> Result<usize, UpdateError> {
        if entry.is_initial() {
            if region.has_initial() {
                return Err(conflict(entry, "region already has an initial entry"));
            }
            return Ok(0);
        }

        let offset = usize::from(region.has_initial());
        let versioned = &region.units[offset..];
        match versioned.binary_search_by(|u| u.entry.version().cmp(&entry.version())) {
            Ok(_) => Err(conflict(entry, "region already has an entry with this version")),
            Err(pos) => Ok(offset + pos),
        }
    }

    /// Path of regions from `from` to `to` following dependency edges
    fn dependency_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![from.to_string()]];
        let mut seen = HashSet::new();
        while let Some(path) = stack.pop() {
            let last = path.last()?.clone();
            if last == to {
                return Some(path);
            }
            if !seen.insert(last.clone()) {
                continue;
            }
            for dep in self.dependencies(&last) {
                let mut next = path.clone();
                next.push(dep.clone());
                stack.push(next);
            }
        }
        None
    }
}

fn conflict(entry: &UpdateEntry, reason: &str) -> UpdateError {
    log::error!("Rejected update {}: {}", entry.label(), reason);
    UpdateError::RegistrationConflict {
        region_id: entry.region_id().to_string(),
        version: entry.version().to_string(),
        reason: reason.to_string(),
    }
}
