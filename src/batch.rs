use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::chain::{ChainResolver, Warning};
use crate::config::LibPrepPolicy;
use crate::domain::BiomaterialId;
use crate::error::ExportError;
use crate::ingest::IngestClient;
use crate::observation::Observation;
use crate::tabular;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRow {
    pub identifier: BiomaterialId,
    pub cell_type: Option<String>,
    pub matrix: Option<Utf8PathBuf>,
    pub barcodes: Option<Utf8PathBuf>,
}

pub fn parse_rows(text: &str) -> Result<Vec<BatchRow>, ExportError> {
    let table = tabular::parse(text)?;
    let identifier = table.column("identifier").ok_or_else(|| {
        ExportError::BatchInput("batch input has no identifier column".to_string())
    })?;
    let cell_type = table.column("type");
    let matrix = table.column("matrix");
    let barcodes = table.column("barcodes");

    let mut rows = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        rows.push(BatchRow {
            identifier: row[identifier].trim().parse()?,
            cell_type: optional(row, cell_type),
            matrix: optional(row, matrix).map(Utf8PathBuf::from),
            barcodes: optional(row, barcodes).map(Utf8PathBuf::from),
        });
    }
    Ok(rows)
}

fn optional(row: &[String], column: Option<usize>) -> Option<String> {
    column
        .map(|at| row[at].trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub observation: Observation,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveFailure {
    pub uuid: String,
    pub kind: &'static str,
    pub message: String,
}

impl ResolveFailure {
    fn new(id: &BiomaterialId, error: &ExportError) -> Self {
        Self {
            uuid: id.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

pub type Outcome = Result<Resolved, ResolveFailure>;

#[derive(Default)]
pub struct ObservationCache {
    entries: Mutex<HashMap<String, Outcome>>,
}

impl ObservationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &BiomaterialId) -> Option<Outcome> {
        self.lock().get(id.as_str()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, id: &BiomaterialId, outcome: Outcome) {
        self.lock().insert(id.to_string(), outcome);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Outcome>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct BatchResolver<'a, C: IngestClient> {
    client: &'a C,
    lib_prep_policy: LibPrepPolicy,
    workers: usize,
}

impl<'a, C: IngestClient> BatchResolver<'a, C> {
    pub fn new(client: &'a C, lib_prep_policy: LibPrepPolicy, workers: usize) -> Self {
        Self {
            client,
            lib_prep_policy,
            workers: workers.max(1),
        }
    }

    pub fn resolve_rows(&self, rows: &[BatchRow], cache: &ObservationCache) -> Vec<Outcome> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for row in rows {
            if cache.get(&row.identifier).is_some() {
                continue;
            }
            if seen.insert(row.identifier.clone()) {
                pending.push(row.identifier.clone());
            }
        }
        self.resolve_pending(pending, cache);
        rows.iter().map(|row| project(row, cache)).collect()
    }

    fn resolve_pending(&self, pending: Vec<BiomaterialId>, cache: &ObservationCache) {
        if pending.is_empty() {
            return;
        }
        info!(
            "resolving {} unique identifier(s) with {} worker(s)",
            pending.len(),
            self.workers
        );
        let queue = Mutex::new(VecDeque::from(pending));
        thread::scope(|scope| {
            for _ in 0..self.workers {
                scope.spawn(|| {
                    loop {
                        let next = {
                            let Ok(mut guard) = queue.lock() else { break };
                            guard.pop_front()
                        };
                        let Some(id) = next else { break };
                        cache.insert(&id, self.resolve_one(&id));
                    }
                });
            }
        });
    }

    fn resolve_one(&self, id: &BiomaterialId) -> Outcome {
        let resolver = ChainResolver::new(self.client, self.lib_prep_policy);
        match resolver.resolve(id) {
            Ok(chain) => {
                let (observation, extraction_warnings) = Observation::from_chain(&chain, None);
                let mut warnings = chain.warnings().to_vec();
                warnings.extend(extraction_warnings);
                Ok(Resolved {
                    observation,
                    warnings,
                })
            }
            Err(error) => {
                warn!("resolution of {id} failed: {error}");
                Err(ResolveFailure::new(id, &error))
            }
        }
    }
}

fn project(row: &BatchRow, cache: &ObservationCache) -> Outcome {
    let Some(outcome) = cache.get(&row.identifier) else {
        return Err(ResolveFailure {
            uuid: row.identifier.to_string(),
            kind: "resolution",
            message: "identifier was never resolved".to_string(),
        });
    };
    let mut resolved = outcome?;
    if let Some(cell_type) = &row.cell_type {
        resolved.observation = resolved.observation.with_cell_type(cell_type);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_all_columns() {
        let rows = parse_rows(
            "identifier,type,matrix,barcodes\n\
             6f0d7d0e-0165-4ac8-bd11-dd21b4d9a7b6,CL:0000236,m.mtx,b.txt\n\
             36b24ba4-7228-4297-b389-c33fcc4316e3,,,\n",
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cell_type.as_deref(), Some("CL:0000236"));
        assert_eq!(rows[0].matrix.as_deref(), Some(camino::Utf8Path::new("m.mtx")));
        assert_eq!(rows[0].barcodes.as_deref(), Some(camino::Utf8Path::new("b.txt")));
        assert_eq!(rows[1].cell_type, None);
        assert_eq!(rows[1].matrix, None);
        assert_eq!(rows[1].barcodes, None);
    }

    #[test]
    fn identifier_column_is_required() {
        let err = parse_rows("uuid\n6f0d7d0e-0165-4ac8-bd11-dd21b4d9a7b6\n").unwrap_err();
        assert_matches!(err, ExportError::BatchInput(_));
    }

    #[test]
    fn malformed_identifier_is_rejected() {
        let err = parse_rows("identifier\nnot-a-uuid\n").unwrap_err();
        assert_matches!(err, ExportError::InvalidBiomaterialId(_));
    }

    #[test]
    fn cache_is_write_once_per_key() {
        let cache = ObservationCache::new();
        let id: BiomaterialId = "6f0d7d0e-0165-4ac8-bd11-dd21b4d9a7b6".parse().unwrap();
        assert!(cache.get(&id).is_none());
        assert!(cache.is_empty());

        cache.insert(
            &id,
            Err(ResolveFailure {
                uuid: id.to_string(),
                kind: "transport",
                message: "boom".to_string(),
            }),
        );
        assert_eq!(cache.len(), 1);
        assert_matches!(cache.get(&id), Some(Err(_)));
    }
}
