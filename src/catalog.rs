use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::EtlError;

/// A remote resource and the table it is loaded into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub resource_id: String,
    pub table_name: String,
}

impl CatalogEntry {
    pub fn new(resource_id: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            table_name: table_name.into(),
        }
    }
}

impl std::fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.resource_id, self.table_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

const MOT_RESOURCES: &[(&str, &str)] = &[
    ("142afde2-6228-49f9-8a29-9b6c3a0cbe40", "mot_submodels"),
    ("5e87a7a1-2f6f-41c1-8aec-7216d52a6cf6", "mot_amounts"),
    ("bb2355dc-9ec7-4f06-9c3f-3344672171da", "mot_car_history_owners"),
    ("56063a99-8a3e-4ff4-912e-5966c0279bad", "mot_car_history_physical"),
    ("053cea08-09bc-40ec-8f7a-156f0677aff3", "mot_imported_private"),
    ("c967097c-3c74-4adf-a732-0fdd2fda56d9", "mot_monthly_on_road_no_degemcode"),
    ("602ac32d-19c0-4b41-88e0-e3ce8a7e80b7", "mot_monthly_on_road"),
    ("0866573c-40cd-4ca8-91d2-9dd2d7a492e5", "mot_plates_com_and_private"),
    ("053cea08-09bc-40ec-8f7a-156f0677aff3", "mot_plates_private"),
    ("39f455bf-6db0-4926-859d-017f34eacbcb", "mot_price_new"),
    ("36bf1404-0be4-49d2-82dc-2f1ead4a8b93", "mot_recall_required"),
    ("2c33523f-87aa-44ec-a736-edbb0a82975e", "mot_recalls"),
    ("83bfb278-7be1-4dab-ae2d-40125a923da1", "mot_safety_discount_ind"),
    ("cf29862d-ca25-4691-84f6-1be60dcb4a1e", "mot_public_transport"),
    ("7cb2bd95-bf2e-49b6-aea1-fcb5ff6f0473", "pollution_filter"),
    ("f6efe89a-fb3d-43a4-bb61-9bf12a9b9099", "mot_no_yearly_inspection"),
    ("6f6acd03-f351-4a8f-8ecf-df792f4f573a", "mot_inactive_no_degemcode"),
    ("851ecab1-0622-4dbe-a6c7-f950cf82abf9", "mot_taken_off_2016_today"),
    ("4e6b9724-4c1e-43f0-909a-154d4cc4e046", "mot_taken_off_2010_2016"),
    ("ec8cbc34-72e1-4b69-9c48-22821ba0bd6c", "mot_taken_off_2000_2009"),
];

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, EtlError> {
        let catalog = Self { entries };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Ministry of Transport vehicle datasets on data.gov.il.
    pub fn builtin() -> Self {
        Self {
            entries: MOT_RESOURCES
                .iter()
                .map(|(resource_id, table_name)| CatalogEntry::new(*resource_id, *table_name))
                .collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EtlError> {
        let catalog: Catalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub async fn from_path(path: &Path) -> Result<Self, EtlError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Two entries may share a resource, but never a target table.
    fn validate(&self) -> Result<(), EtlError> {
        if self.entries.is_empty() {
            return Err(EtlError::ConfigError {
                message: "catalog has no entries".to_string(),
            });
        }

        let mut tables = HashSet::new();
        for entry in &self.entries {
            if entry.resource_id.trim().is_empty() || entry.table_name.trim().is_empty() {
                return Err(EtlError::ConfigError {
                    message: format!("catalog entry '{}' is incomplete", entry),
                });
            }
            if !tables.insert(entry.table_name.as_str()) {
                return Err(EtlError::ConfigError {
                    message: format!("table '{}' appears twice in catalog", entry.table_name),
                });
            }
        }
        Ok(())
    }
}
