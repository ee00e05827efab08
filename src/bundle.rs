use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::assemble::AnnotatedDataset;
use crate::error::ExportError;
use crate::matrix;
use crate::observation::{CSV_HEADER, Observation};
use crate::tabular;

pub const OBSERVATIONS_FILE: &str = "obs.csv";
pub const MATRIX_FILE: &str = "matrix.mtx";
pub const METADATA_FILE: &str = "uns.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBundle {
    pub observations: Utf8PathBuf,
    pub matrix: Utf8PathBuf,
    pub metadata: Utf8PathBuf,
}

pub fn write_observations(
    out_dir: &Utf8Path,
    observations: &[Observation],
) -> Result<Utf8PathBuf, ExportError> {
    let rows: Vec<Vec<String>> = observations
        .iter()
        .map(|observation| observation.to_record().to_vec())
        .collect();
    let path = out_dir.join(OBSERVATIONS_FILE);
    write_bytes_atomic(&path, tabular::render(&CSV_HEADER, &rows).as_bytes())?;
    info!("wrote {} observation row(s) to {path}", observations.len());
    Ok(path)
}

pub fn write_dataset(
    out_dir: &Utf8Path,
    dataset: &AnnotatedDataset,
) -> Result<WrittenBundle, ExportError> {
    let observations = write_observations(out_dir, &dataset.observations)?;

    let matrix_path = out_dir.join(MATRIX_FILE);
    write_bytes_atomic(&matrix_path, matrix::render_matrix(&dataset.matrix).as_bytes())?;

    let metadata_path = out_dir.join(METADATA_FILE);
    let metadata = serde_json::to_vec_pretty(&dataset.metadata)
        .map_err(|err| ExportError::Filesystem(err.to_string()))?;
    write_bytes_atomic(&metadata_path, &metadata)?;

    info!(
        "wrote dataset bundle ({} cell(s)) to {out_dir}",
        dataset.matrix.rows
    );
    Ok(WrittenBundle {
        observations,
        matrix: matrix_path,
        metadata: metadata_path,
    })
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ExportError> {
    let parent = path
        .parent()
        .ok_or_else(|| ExportError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ExportError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("hca-cellxgene")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ExportError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| ExportError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| ExportError::Filesystem(err.to_string()))?;
    Ok(())
}
