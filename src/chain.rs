use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::LibPrepPolicy;
use crate::domain::{BiomaterialId, Entity, EntityType};
use crate::error::ExportError;
use crate::ingest::IngestClient;

const MAX_DERIVATION_HOPS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub entity: String,
    pub relation: String,
    pub detail: String,
}

impl Warning {
    pub fn new(entity: &str, relation: &str, detail: String) -> Self {
        Self {
            entity: entity.to_string(),
            relation: relation.to_string(),
            detail,
        }
    }
}

#[derive(Debug)]
pub struct Chain {
    entities: Vec<Entity>,
    index: HashMap<EntityType, usize>,
    warnings: Vec<Warning>,
}

impl Chain {
    pub fn new(leaf: Entity) -> Self {
        let mut index = HashMap::new();
        index.insert(leaf.entity_type.clone(), 0);
        Self {
            entities: vec![leaf],
            index,
            warnings: Vec::new(),
        }
    }

    pub fn append(&mut self, entity: Entity) -> Result<(), ExportError> {
        if self.index.contains_key(&entity.entity_type) {
            return Err(ExportError::Structural(format!(
                "duplicate {} in chain (entity {})",
                entity.entity_type, entity.uuid
            )));
        }
        info!("added {} {} to chain", entity.entity_type, entity.uuid);
        self.index
            .insert(entity.entity_type.clone(), self.entities.len());
        self.entities.push(entity);
        Ok(())
    }

    pub fn get(&self, entity_type: &EntityType) -> Option<&Entity> {
        self.index.get(entity_type).map(|&at| &self.entities[at])
    }

    pub fn leaf(&self) -> &Entity {
        &self.entities[0]
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn record_warning(&mut self, warning: Warning) {
        warn!(
            "{} ({} of {})",
            warning.detail, warning.relation, warning.entity
        );
        self.warnings.push(warning);
    }
}

pub struct ChainResolver<'a, C: IngestClient> {
    client: &'a C,
    lib_prep_policy: LibPrepPolicy,
}

impl<'a, C: IngestClient> ChainResolver<'a, C> {
    pub fn new(client: &'a C, lib_prep_policy: LibPrepPolicy) -> Self {
        Self {
            client,
            lib_prep_policy,
        }
    }

    pub fn resolve(&self, id: &BiomaterialId) -> Result<Chain, ExportError> {
        let leaf = self.client.entity_by_uuid("biomaterials", id)?;
        if leaf.entity_type != EntityType::CellSuspension {
            return Err(ExportError::NotFound(format!(
                "{id} is a {}, expected a cell_suspension",
                leaf.entity_type
            )));
        }
        info!("building provenance chain for cell suspension {id}");

        let mut chain = Chain::new(leaf);
        if let Some(lib_prep) = self.resolve_lib_prep(&mut chain)? {
            chain.append(lib_prep)?;
        }

        let mut current = 0usize;
        for _ in 0..MAX_DERIVATION_HOPS {
            let processes = self
                .client
                .related(&chain.entities[current], "derivedByProcesses")?;
            let current_uuid = chain.entities[current].uuid.clone();
            let Some(process) =
                first_candidate(&mut chain, &current_uuid, "derivedByProcesses", processes)
            else {
                return Err(ExportError::Structural(format!(
                    "biomaterial {current_uuid} has no derivation process and no donor_organism was reached"
                )));
            };

            let protocols = self.client.related(&process, "protocols")?;
            if let Some(protocol) =
                first_candidate(&mut chain, &process.uuid, "protocols", protocols)
            {
                chain.append(protocol)?;
            }

            let biomaterials = self.client.related(&process, "inputBiomaterials")?;
            let Some(biomaterial) =
                first_candidate(&mut chain, &process.uuid, "inputBiomaterials", biomaterials)
            else {
                return Err(ExportError::Structural(format!(
                    "process {} has no input biomaterials",
                    process.uuid
                )));
            };

            let reached_root = biomaterial.entity_type == EntityType::DonorOrganism;
            chain.append(biomaterial)?;
            current = chain.len() - 1;
            if reached_root {
                ensure_complete(&chain)?;
                return Ok(chain);
            }
        }

        Err(ExportError::Structural(format!(
            "no donor_organism within {MAX_DERIVATION_HOPS} derivation hops of {id}"
        )))
    }

    fn resolve_lib_prep(&self, chain: &mut Chain) -> Result<Option<Entity>, ExportError> {
        let processes = self.client.related(chain.leaf(), "inputToProcesses")?;
        let mut candidates: Vec<Entity> = Vec::new();
        for process in &processes {
            for protocol in self.client.related(process, "protocols")? {
                if protocol.entity_type == EntityType::LibraryPreparationProtocol
                    && !candidates.iter().any(|seen| seen.uuid == protocol.uuid)
                {
                    candidates.push(protocol);
                }
            }
        }
        if candidates.len() <= 1 {
            return Ok(candidates.pop());
        }

        let leaf_uuid = chain.leaf().uuid.clone();
        let mut candidates = candidates.into_iter();
        let first = match candidates.next() {
            Some(first) => first,
            None => return Ok(None),
        };
        let discarded = candidates
            .map(|protocol| protocol.uuid)
            .collect::<Vec<_>>()
            .join(", ");
        match self.lib_prep_policy {
            LibPrepPolicy::Omit => {
                chain.record_warning(Warning::new(
                    &leaf_uuid,
                    "inputToProcesses",
                    format!(
                        "multiple library preparation protocols ({}, {discarded}); omitting the protocol",
                        first.uuid
                    ),
                ));
                Ok(None)
            }
            LibPrepPolicy::KeepFirst => {
                chain.record_warning(Warning::new(
                    &leaf_uuid,
                    "inputToProcesses",
                    format!(
                        "multiple library preparation protocols, keeping {}; discarded {discarded}",
                        first.uuid
                    ),
                ));
                Ok(Some(first))
            }
        }
    }
}

fn first_candidate(
    chain: &mut Chain,
    owner: &str,
    relation: &str,
    candidates: Vec<Entity>,
) -> Option<Entity> {
    let mut candidates = candidates.into_iter();
    let first = candidates.next()?;
    let discarded = candidates
        .map(|entity| entity.uuid)
        .collect::<Vec<_>>();
    if !discarded.is_empty() {
        chain.record_warning(Warning::new(
            owner,
            relation,
            format!(
                "{} candidates where one was expected, using {}; discarded {}",
                discarded.len() + 1,
                first.uuid,
                discarded.join(", ")
            ),
        ));
    }
    Some(first)
}

fn ensure_complete(chain: &Chain) -> Result<(), ExportError> {
    for required in [EntityType::SpecimenFromOrganism, EntityType::DonorOrganism] {
        if chain.get(&required).is_none() {
            return Err(ExportError::Structural(format!(
                "chain for {} has no {required}",
                chain.leaf().uuid
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn entity(uuid: &str, type_name: &str) -> Entity {
        Entity::from_document(json!({
            "uuid": { "uuid": uuid },
            "content": {
                "describedBy": format!("https://schema.humancellatlas.org/type/.../{type_name}")
            }
        }))
        .unwrap()
    }

    #[test]
    fn append_rejects_duplicate_type() {
        let mut chain = Chain::new(entity("00000000-0000-4000-8000-000000000001", "cell_suspension"));
        chain
            .append(entity("00000000-0000-4000-8000-000000000002", "specimen_from_organism"))
            .unwrap();

        let err = chain
            .append(entity("00000000-0000-4000-8000-000000000003", "specimen_from_organism"))
            .unwrap_err();
        assert_matches!(err, ExportError::Structural(_));
    }

    #[test]
    fn get_is_type_keyed() {
        let mut chain = Chain::new(entity("00000000-0000-4000-8000-000000000001", "cell_suspension"));
        chain
            .append(entity("00000000-0000-4000-8000-000000000002", "dissociation_protocol"))
            .unwrap();
        chain
            .append(entity("00000000-0000-4000-8000-000000000003", "donor_organism"))
            .unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.get(&EntityType::DonorOrganism).map(|e| e.uuid.as_str()),
            Some("00000000-0000-4000-8000-000000000003")
        );
        assert_eq!(chain.get(&EntityType::Organoid), None);
        assert_eq!(chain.leaf().uuid, "00000000-0000-4000-8000-000000000001");
    }

    #[test]
    fn first_candidate_records_discarded_alternatives() {
        let mut chain = Chain::new(entity("00000000-0000-4000-8000-000000000001", "cell_suspension"));
        let picked = first_candidate(
            &mut chain,
            "00000000-0000-4000-8000-000000000001",
            "derivedByProcesses",
            vec![
                entity("00000000-0000-4000-8000-00000000000a", "process"),
                entity("00000000-0000-4000-8000-00000000000b", "process"),
            ],
        )
        .unwrap();

        assert_eq!(picked.uuid, "00000000-0000-4000-8000-00000000000a");
        assert_eq!(chain.warnings().len(), 1);
        assert!(chain.warnings()[0].detail.contains("00000000-0000-4000-8000-00000000000b"));
        assert_eq!(chain.warnings()[0].relation, "derivedByProcesses");
    }

    #[test]
    fn first_candidate_single_is_silent() {
        let mut chain = Chain::new(entity("00000000-0000-4000-8000-000000000001", "cell_suspension"));
        let picked = first_candidate(
            &mut chain,
            "00000000-0000-4000-8000-000000000001",
            "derivedByProcesses",
            vec![entity("00000000-0000-4000-8000-00000000000a", "process")],
        );
        assert!(picked.is_some());
        assert!(chain.warnings().is_empty());

        let none = first_candidate(
            &mut chain,
            "00000000-0000-4000-8000-000000000001",
            "protocols",
            Vec::new(),
        );
        assert!(none.is_none());
        assert!(chain.warnings().is_empty());
    }
}
