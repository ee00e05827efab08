use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    #[error("invalid biomaterial id: {0}")]
    InvalidBiomaterialId(String),

    #[error("invalid batch input: {0}")]
    BatchInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("ingest request failed: {0}")]
    IngestHttp(String),

    #[error("ingest returned status {status}: {message}")]
    IngestStatus { status: u16, message: String },

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("broken provenance chain: {0}")]
    Structural(String),

    #[error("resolution failed for {uuid}: {message}")]
    Resolution { uuid: String, message: String },

    #[error("batch completed with {failed} failed row(s)")]
    Partial { failed: usize },

    #[error("dimension mismatch: {0}")]
    Dimension(String),

    #[error("malformed matrix data: {0}")]
    MatrixFormat(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl ExportError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::InvalidBiomaterialId(_) => "invalid-id",
            ExportError::BatchInput(_) => "batch-input",
            ExportError::Config(_) => "config",
            ExportError::IngestHttp(_) | ExportError::IngestStatus { .. } => "transport",
            ExportError::NotFound(_) => "not-found",
            ExportError::Structural(_) => "structural",
            ExportError::Resolution { .. } => "resolution",
            ExportError::Partial { .. } => "partial",
            ExportError::Dimension(_) => "dimension",
            ExportError::MatrixFormat(_) => "matrix-format",
            ExportError::Filesystem(_) => "filesystem",
        }
    }
}
