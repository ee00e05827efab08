use serde::Serialize;
use serde_json::Value;

use crate::chain::{Chain, Warning};
use crate::domain::{Entity, EntityType};

pub const UNKNOWN: &str = "unknown";

pub const CSV_HEADER: [&str; 10] = [
    "sample_id",
    "assay_ontology_term_id",
    "cell_type_ontology_term_id",
    "development_stage_ontology_term_id",
    "disease_ontology_term_id",
    "ethnicity_ontology_term_id",
    "is_primary_data",
    "organism_ontology_term_id",
    "sex_ontology_term_id",
    "tissue_ontology_term_id",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub sample_id: String,
    pub assay_ontology_term_id: String,
    pub cell_type_ontology_term_id: String,
    pub development_stage_ontology_term_id: String,
    pub disease_ontology_term_id: String,
    pub ethnicity_ontology_term_id: String,
    pub is_primary_data: bool,
    pub organism_ontology_term_id: String,
    pub sex_ontology_term_id: String,
    pub tissue_ontology_term_id: String,
}

impl Observation {
    pub fn from_chain(chain: &Chain, cell_type: Option<&str>) -> (Self, Vec<Warning>) {
        let mut warnings = Vec::new();
        let leaf = Some(chain.leaf());
        let lib_prep = chain.get(&EntityType::LibraryPreparationProtocol);
        let specimen = chain.get(&EntityType::SpecimenFromOrganism);
        let donor = chain.get(&EntityType::DonorOrganism);

        let observation = Self {
            sample_id: text(leaf, "/biomaterial_core/biomaterial_id").unwrap_or_else(unknown),
            assay_ontology_term_id: text(lib_prep, "/library_construction_method/text")
                .unwrap_or_else(unknown),
            cell_type_ontology_term_id: cell_type
                .map(str::to_string)
                .unwrap_or_else(unknown),
            development_stage_ontology_term_id: text(donor, "/development_stage/text")
                .unwrap_or_else(unknown),
            disease_ontology_term_id: disease(specimen, &mut warnings).unwrap_or_else(unknown),
            ethnicity_ontology_term_id: text(donor, "/human_specific/ethnicity/0/text")
                .unwrap_or_else(unknown),
            is_primary_data: true,
            organism_ontology_term_id: text(donor, "/genus_species/0/text")
                .unwrap_or_else(unknown),
            sex_ontology_term_id: text(donor, "/sex").unwrap_or_else(unknown),
            tissue_ontology_term_id: tissue(chain, &mut warnings).unwrap_or_else(unknown),
        };
        (observation, warnings)
    }

    pub fn with_cell_type(&self, cell_type: &str) -> Self {
        Self {
            cell_type_ontology_term_id: cell_type.to_string(),
            ..self.clone()
        }
    }

    pub fn to_record(&self) -> [String; 10] {
        [
            self.sample_id.clone(),
            self.assay_ontology_term_id.clone(),
            self.cell_type_ontology_term_id.clone(),
            self.development_stage_ontology_term_id.clone(),
            self.disease_ontology_term_id.clone(),
            self.ethnicity_ontology_term_id.clone(),
            self.is_primary_data.to_string(),
            self.organism_ontology_term_id.clone(),
            self.sex_ontology_term_id.clone(),
            self.tissue_ontology_term_id.clone(),
        ]
    }
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn text(entity: Option<&Entity>, pointer: &str) -> Option<String> {
    entity
        .and_then(|entity| entity.content().pointer(pointer))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn disease(specimen: Option<&Entity>, warnings: &mut Vec<Warning>) -> Option<String> {
    let specimen = specimen?;
    let diseases = specimen
        .content()
        .pointer("/diseases")
        .and_then(Value::as_array)?;
    if diseases.len() > 1 {
        let discarded: Vec<&str> = diseases[1..]
            .iter()
            .filter_map(|value| value.pointer("/text").and_then(Value::as_str))
            .collect();
        warnings.push(Warning::new(
            &specimen.uuid,
            "diseases",
            format!(
                "{} diseases listed, using the first; discarded {}",
                diseases.len(),
                discarded.join(", ")
            ),
        ));
    }
    diseases
        .first()
        .and_then(|value| value.pointer("/text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn tissue(chain: &Chain, warnings: &mut Vec<Warning>) -> Option<String> {
    if let Some(organoid) = chain.get(&EntityType::Organoid) {
        let term = text(Some(organoid), "/model_organ_part/text")
            .or_else(|| text(Some(organoid), "/model_organ/text"));
        if term.is_none() {
            warnings.push(Warning::new(
                &organoid.uuid,
                "tissue",
                "organoid carries neither model_organ_part nor model_organ".to_string(),
            ));
        }
        return term;
    }
    if let Some(cell_line) = chain.get(&EntityType::CellLine) {
        let term = text(Some(cell_line), "/tissue/text");
        if term.is_none() {
            warnings.push(Warning::new(
                &cell_line.uuid,
                "tissue",
                "cell_line carries no tissue field".to_string(),
            ));
        }
        return term;
    }
    let specimen = chain.get(&EntityType::SpecimenFromOrganism);
    let term = text(specimen, "/organ_parts/0/text").or_else(|| text(specimen, "/organ/text"));
    if term.is_none() {
        if let Some(specimen) = specimen {
            warnings.push(Warning::new(
                &specimen.uuid,
                "tissue",
                "specimen carries neither organ_parts nor organ".to_string(),
            ));
        }
    }
    term
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entity(uuid: &str, type_name: &str, content: Value) -> Entity {
        let mut content = content;
        content["describedBy"] =
            json!(format!("https://schema.humancellatlas.org/type/.../{type_name}"));
        Entity::from_document(json!({
            "uuid": { "uuid": uuid },
            "content": content,
        }))
        .unwrap()
    }

    fn full_chain() -> Chain {
        let mut chain = Chain::new(entity(
            "00000000-0000-4000-8000-000000000001",
            "cell_suspension",
            json!({ "biomaterial_core": { "biomaterial_id": "suspension_1" } }),
        ));
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000002",
                "library_preparation_protocol",
                json!({ "library_construction_method": { "text": "EFO:0009899" } }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000003",
                "specimen_from_organism",
                json!({
                    "diseases": [{ "text": "PATO:0000461" }],
                    "organ_parts": [{ "text": "UBERON:0002190" }],
                    "organ": { "text": "UBERON:0002048" },
                }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000004",
                "donor_organism",
                json!({
                    "development_stage": { "text": "HsapDv:0000087" },
                    "human_specific": { "ethnicity": [{ "text": "HANCESTRO:0005" }] },
                    "genus_species": [{ "text": "NCBITaxon:9606" }],
                    "sex": "female",
                }),
            ))
            .unwrap();
        chain
    }

    #[test]
    fn binds_all_fields_from_full_chain() {
        let (observation, warnings) = Observation::from_chain(&full_chain(), Some("CL:0000236"));

        assert!(warnings.is_empty());
        assert_eq!(observation.sample_id, "suspension_1");
        assert_eq!(observation.assay_ontology_term_id, "EFO:0009899");
        assert_eq!(observation.cell_type_ontology_term_id, "CL:0000236");
        assert_eq!(observation.development_stage_ontology_term_id, "HsapDv:0000087");
        assert_eq!(observation.disease_ontology_term_id, "PATO:0000461");
        assert_eq!(observation.ethnicity_ontology_term_id, "HANCESTRO:0005");
        assert!(observation.is_primary_data);
        assert_eq!(observation.organism_ontology_term_id, "NCBITaxon:9606");
        assert_eq!(observation.sex_ontology_term_id, "female");
        assert_eq!(observation.tissue_ontology_term_id, "UBERON:0002190");
    }

    #[test]
    fn missing_fields_map_to_sentinel() {
        let mut chain = Chain::new(entity(
            "00000000-0000-4000-8000-000000000001",
            "cell_suspension",
            json!({}),
        ));
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000003",
                "specimen_from_organism",
                json!({ "organ": { "text": "UBERON:0002048" } }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000004",
                "donor_organism",
                json!({ "sex": "male" }),
            ))
            .unwrap();

        let (observation, _) = Observation::from_chain(&chain, None);
        assert_eq!(observation.sample_id, UNKNOWN);
        assert_eq!(observation.assay_ontology_term_id, UNKNOWN);
        assert_eq!(observation.cell_type_ontology_term_id, UNKNOWN);
        assert_eq!(observation.development_stage_ontology_term_id, UNKNOWN);
        assert_eq!(observation.disease_ontology_term_id, UNKNOWN);
        assert_eq!(observation.ethnicity_ontology_term_id, UNKNOWN);
        assert_eq!(observation.sex_ontology_term_id, "male");
        assert_eq!(observation.tissue_ontology_term_id, "UBERON:0002048");
    }

    #[test]
    fn multiple_diseases_take_first_with_warning() {
        let mut chain = Chain::new(entity(
            "00000000-0000-4000-8000-000000000001",
            "cell_suspension",
            json!({}),
        ));
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000003",
                "specimen_from_organism",
                json!({
                    "diseases": [{ "text": "MONDO:0005109" }, { "text": "PATO:0000461" }],
                    "organ": { "text": "UBERON:0002048" },
                }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000004",
                "donor_organism",
                json!({}),
            ))
            .unwrap();

        let (observation, warnings) = Observation::from_chain(&chain, None);
        assert_eq!(observation.disease_ontology_term_id, "MONDO:0005109");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].relation, "diseases");
        assert!(warnings[0].detail.contains("PATO:0000461"));
    }

    #[test]
    fn organoid_tissue_falls_back_to_model_organ() {
        let mut chain = Chain::new(entity(
            "00000000-0000-4000-8000-000000000001",
            "cell_suspension",
            json!({}),
        ));
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000005",
                "organoid",
                json!({ "model_organ": { "text": "UBERON:0000955" } }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000003",
                "specimen_from_organism",
                json!({ "organ": { "text": "UBERON:0002048" } }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000004",
                "donor_organism",
                json!({}),
            ))
            .unwrap();

        let (observation, warnings) = Observation::from_chain(&chain, None);
        assert_eq!(observation.tissue_ontology_term_id, "UBERON:0000955");
        assert!(warnings.is_empty());
    }

    #[test]
    fn organoid_without_model_fields_never_reads_specimen() {
        let mut chain = Chain::new(entity(
            "00000000-0000-4000-8000-000000000001",
            "cell_suspension",
            json!({}),
        ));
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000005",
                "organoid",
                json!({}),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000003",
                "specimen_from_organism",
                json!({ "organ": { "text": "UBERON:0002048" } }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000004",
                "donor_organism",
                json!({}),
            ))
            .unwrap();

        let (observation, warnings) = Observation::from_chain(&chain, None);
        assert_eq!(observation.tissue_ontology_term_id, UNKNOWN);
        assert!(warnings.iter().any(|w| w.relation == "tissue"));
    }

    #[test]
    fn cell_line_tissue_tier() {
        let mut chain = Chain::new(entity(
            "00000000-0000-4000-8000-000000000001",
            "cell_suspension",
            json!({}),
        ));
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000006",
                "cell_line",
                json!({ "tissue": { "text": "UBERON:0001264" } }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000003",
                "specimen_from_organism",
                json!({ "organ": { "text": "UBERON:0002048" } }),
            ))
            .unwrap();
        chain
            .append(entity(
                "00000000-0000-4000-8000-000000000004",
                "donor_organism",
                json!({}),
            ))
            .unwrap();

        let (observation, _) = Observation::from_chain(&chain, None);
        assert_eq!(observation.tissue_ontology_term_id, "UBERON:0001264");
    }

    #[test]
    fn override_copy_leaves_base_untouched() {
        let (base, _) = Observation::from_chain(&full_chain(), None);
        let overridden = base.with_cell_type("CL:0000057");

        assert_eq!(overridden.cell_type_ontology_term_id, "CL:0000057");
        assert_eq!(base.cell_type_ontology_term_id, UNKNOWN);
        assert_eq!(overridden.sample_id, base.sample_id);
    }

    #[test]
    fn record_order_matches_header() {
        let (observation, _) = Observation::from_chain(&full_chain(), None);
        let record = observation.to_record();

        assert_eq!(record.len(), CSV_HEADER.len());
        assert_eq!(record[0], observation.sample_id);
        assert_eq!(record[6], "true");
        assert_eq!(record[9], observation.tissue_ontology_term_id);
    }
}
