use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExportError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BiomaterialId(String);

impl BiomaterialId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BiomaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BiomaterialId {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let groups = normalized.split('-').collect::<Vec<_>>();
        let is_valid = groups.len() == 5
            && groups
                .iter()
                .zip([8usize, 4, 4, 4, 12])
                .all(|(group, len)| {
                    group.len() == len && group.chars().all(|ch| ch.is_ascii_hexdigit())
                });
        if !is_valid {
            return Err(ExportError::InvalidBiomaterialId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityType {
    CellSuspension,
    LibraryPreparationProtocol,
    SpecimenFromOrganism,
    CellLine,
    Organoid,
    DonorOrganism,
    Other(String),
}

impl EntityType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "cell_suspension" => EntityType::CellSuspension,
            "library_preparation_protocol" => EntityType::LibraryPreparationProtocol,
            "specimen_from_organism" => EntityType::SpecimenFromOrganism,
            "cell_line" => EntityType::CellLine,
            "organoid" => EntityType::Organoid,
            "donor_organism" => EntityType::DonorOrganism,
            other => EntityType::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EntityType::CellSuspension => "cell_suspension",
            EntityType::LibraryPreparationProtocol => "library_preparation_protocol",
            EntityType::SpecimenFromOrganism => "specimen_from_organism",
            EntityType::CellLine => "cell_line",
            EntityType::Organoid => "organoid",
            EntityType::DonorOrganism => "donor_organism",
            EntityType::Other(name) => name,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub uuid: String,
    pub entity_type: EntityType,
    document: Value,
}

static NULL: Value = Value::Null;

impl Entity {
    pub fn from_document(document: Value) -> Result<Self, ExportError> {
        let uuid = document
            .get("uuid")
            .and_then(|value| value.get("uuid"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| ExportError::Structural("entity document has no uuid".to_string()))?
            .to_string();
        let described_by = document
            .get("content")
            .and_then(|value| value.get("describedBy"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                ExportError::Structural(format!("entity {uuid} has no describedBy"))
            })?;
        let type_name = described_by.rsplit('/').next().unwrap_or(described_by);
        let entity_type = EntityType::from_name(type_name);
        Ok(Self {
            uuid,
            entity_type,
            document,
        })
    }

    pub fn content(&self) -> &Value {
        self.document.get("content").unwrap_or(&NULL)
    }

    pub fn link(&self, relation: &str) -> Option<&str> {
        self.document
            .get("_links")
            .and_then(|links| links.get(relation))
            .and_then(|link| link.get("href"))
            .and_then(|href| href.as_str())
    }
}
