//! Region manifests
//!
//! A manifest declares regions and their update entries in TOML:
//!
//! ```toml
//! [[region]]
//! id = "crm"
//! depends_on = ["core"]
//!
//! [region.initial]
//! date = "2024-01-15"
//! description = "Contacts"
//! changes = [
//!     { op = "create_table", table = "t_contact", columns = [
//!         { name = "id", type = "big_integer", primary_key = true },
//!     ] },
//! ]
//!
//! [[region.updates]]
//! version = "1.1"
//! date = "2024-03-02"
//! description = "Contact email"
//! changes = [
//!     { op = "add_column", table = "t_contact", column = { name = "email", type = "string", length = 255 } },
//! ]
//! ```
//!
//! Each region becomes a [`ManifestContributor`]; entries with several
//! changes run them as one composite update.

use serde::Deserialize;
use std::path::Path;
use sysupdater::update::{
    ContributionOutcome, SchemaChange, UpdateContributor, UpdateEntry, UpdateError,
    UpdateRegistry, UpdateUnit, Version,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Region '{region}': {reason}")]
    Invalid { region: String, reason: String },
    #[error(transparent)]
    Update(#[from] UpdateError),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Manifest {
    #[serde(default, rename = "region")]
    pub regions: Vec<RegionManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionManifest {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub initial: Option<InitialManifest>,
    #[serde(default)]
    pub updates: Vec<UpdateManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitialManifest {
    pub date: String,
    pub description: String,
    pub changes: Vec<SchemaChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateManifest {
    pub version: String,
    pub date: String,
    pub description: String,
    pub changes: Vec<SchemaChange>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(content)?)
    }

    /// One contributor per region, with versions parsed up front
    pub fn contributors(&self) -> Result<Vec<ManifestContributor>, ManifestError> {
        self.regions.iter().map(ManifestContributor::from_region).collect()
    }

    /// Register every region into `registry`
    pub fn register(
        &self,
        registry: &mut UpdateRegistry,
    ) -> Result<Vec<ContributionOutcome>, ManifestError> {
        Ok(self
            .contributors()?
            .iter()
            .map(|contributor| registry.register_contributor(contributor))
            .collect())
    }
}

/// Region declared in a manifest
#[derive(Debug, Clone)]
pub struct ManifestContributor {
    region_id: String,
    depends_on: Vec<String>,
    initial: Option<(String, String, SchemaChange)>,
    updates: Vec<(Version, String, String, SchemaChange)>,
}

impl ManifestContributor {
    fn from_region(region: &RegionManifest) -> Result<Self, ManifestError> {
        let initial = region
            .initial
            .as_ref()
            .map(|i| {
                Ok::<_, ManifestError>((
                    i.date.clone(),
                    i.description.clone(),
                    combine(&region.id, &i.changes)?,
                ))
            })
            .transpose()?;

        let updates = region
            .updates
            .iter()
            .map(|u| -> Result<_, ManifestError> {
                Ok((
                    Version::parse(&u.version)?,
                    u.date.clone(),
                    u.description.clone(),
                    combine(&region.id, &u.changes)?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            region_id: region.id.clone(),
            depends_on: region.depends_on.clone(),
            initial,
            updates,
        })
    }
}

fn combine(region: &str, changes: &[SchemaChange]) -> Result<SchemaChange, ManifestError> {
    match changes {
        [] => Err(ManifestError::Invalid {
            region: region.to_string(),
            reason: "update without changes".to_string(),
        }),
        [single] => Ok(single.clone()),
        many => Ok(SchemaChange::Composite {
            changes: many.to_vec(),
        }),
    }
}

impl UpdateContributor for ManifestContributor {
    fn region_id(&self) -> &str {
        &self.region_id
    }

    fn initialization_update(&self) -> Option<UpdateUnit> {
        self.initial.as_ref().map(|(date, description, change)| {
            UpdateUnit::new(
                UpdateEntry::initial(&self.region_id, date, description.as_str()),
                change.clone(),
            )
        })
    }

    fn updates(&self) -> Vec<UpdateUnit> {
        self.updates
            .iter()
            .map(|(version, date, description, change)| {
                UpdateUnit::new(
                    UpdateEntry::with_version(&self.region_id, *version, date, description.as_str()),
                    change.clone(),
                )
            })
            .collect()
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }
}
