use camino::Utf8Path;
use camino::Utf8PathBuf;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::batch::{BatchRow, Outcome};
use crate::error::ExportError;
use crate::matrix::{self, SparseMatrix};
use crate::observation::Observation;

#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub row: usize,
    pub uuid: String,
    pub matrix: Utf8PathBuf,
    pub barcodes: Utf8PathBuf,
    pub observation: Observation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub matrix: SparseMatrix,
    pub observations: Vec<Observation>,
    pub barcodes: Vec<String>,
}

#[derive(Debug)]
pub struct BlockFailure {
    pub row: usize,
    pub uuid: String,
    pub error: ExportError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    pub title: String,
    #[serde(rename = "X_normalization")]
    pub x_normalization: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedDataset {
    pub matrix: SparseMatrix,
    pub observations: Vec<Observation>,
    pub barcodes: Vec<String>,
    pub metadata: DatasetMetadata,
}

pub fn block_requests(
    rows: &[BatchRow],
    outcomes: &[Outcome],
) -> Result<Vec<BlockRequest>, ExportError> {
    let mut requests = Vec::new();
    for (at, (row, outcome)) in rows.iter().zip(outcomes).enumerate() {
        let Ok(resolved) = outcome else { continue };
        let (Some(matrix), Some(barcodes)) = (&row.matrix, &row.barcodes) else {
            return Err(ExportError::BatchInput(format!(
                "row {} ({}) needs both matrix and barcodes references",
                at + 1,
                row.identifier
            )));
        };
        requests.push(BlockRequest {
            row: at,
            uuid: row.identifier.to_string(),
            matrix: matrix.clone(),
            barcodes: barcodes.clone(),
            observation: resolved.observation.clone(),
        });
    }
    Ok(requests)
}

pub struct MatrixAssembler {
    pool: rayon::ThreadPool,
}

impl MatrixAssembler {
    pub fn new(workers: usize) -> Result<Self, ExportError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|err| ExportError::Filesystem(format!("assembly pool: {err}")))?;
        Ok(Self { pool })
    }

    pub fn load_blocks(&self, requests: Vec<BlockRequest>) -> Vec<Result<Block, BlockFailure>> {
        info!("assembling {} matrix group(s)", requests.len());
        self.pool.install(|| {
            requests
                .into_par_iter()
                .map(|request| {
                    load_block(&request.matrix, &request.barcodes, &request.observation)
                        .map_err(|error| BlockFailure {
                            row: request.row,
                            uuid: request.uuid,
                            error,
                        })
                })
                .collect()
        })
    }
}

pub fn concat(
    blocks: Vec<Block>,
    metadata: DatasetMetadata,
) -> Result<AnnotatedDataset, ExportError> {
    let mut observations = Vec::new();
    let mut barcodes = Vec::new();
    let mut matrices = Vec::with_capacity(blocks.len());
    for block in blocks {
        observations.extend(block.observations);
        barcodes.extend(block.barcodes);
        matrices.push(block.matrix);
    }
    let matrix = SparseMatrix::concat_rows(matrices)?;
    Ok(AnnotatedDataset {
        matrix,
        observations,
        barcodes,
        metadata,
    })
}

fn load_block(
    matrix_path: &Utf8Path,
    barcodes_path: &Utf8Path,
    observation: &Observation,
) -> Result<Block, ExportError> {
    let barcodes = matrix::read_barcodes(barcodes_path)?;
    let matrix = matrix::read_matrix(matrix_path)?.transpose();
    if matrix.rows != barcodes.len() {
        return Err(ExportError::Dimension(format!(
            "{matrix_path}: {} matrix row(s) after transpose, {} barcode(s) in {barcodes_path}",
            matrix.rows,
            barcodes.len()
        )));
    }
    let observations = vec![observation.clone(); barcodes.len()];
    Ok(Block {
        matrix,
        observations,
        barcodes,
    })
}
