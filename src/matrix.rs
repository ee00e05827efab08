use std::fs::File;
use std::io::{BufRead, BufReader, Lines};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use tracing::info;

use crate::error::ExportError;

#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub entries: Vec<(usize, usize, f64)>,
}

impl SparseMatrix {
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn transpose(self) -> Self {
        Self {
            rows: self.cols,
            cols: self.rows,
            entries: self
                .entries
                .into_iter()
                .map(|(row, col, value)| (col, row, value))
                .collect(),
        }
    }

    pub fn concat_rows(blocks: Vec<SparseMatrix>) -> Result<SparseMatrix, ExportError> {
        let mut blocks = blocks.into_iter();
        let Some(mut combined) = blocks.next() else {
            return Ok(SparseMatrix {
                rows: 0,
                cols: 0,
                entries: Vec::new(),
            });
        };
        for block in blocks {
            if block.cols != combined.cols {
                return Err(ExportError::Dimension(format!(
                    "cannot concatenate a block with {} column(s) onto {}",
                    block.cols, combined.cols
                )));
            }
            let offset = combined.rows;
            combined.entries.extend(
                block
                    .entries
                    .into_iter()
                    .map(|(row, col, value)| (row + offset, col, value)),
            );
            combined.rows += block.rows;
        }
        Ok(combined)
    }
}

pub fn read_matrix(path: &Utf8Path) -> Result<SparseMatrix, ExportError> {
    info!("loading matrix {path}");
    parse_matrix(open_reader(path)?).map_err(|err| match err {
        ExportError::MatrixFormat(message) => {
            ExportError::MatrixFormat(format!("{path}: {message}"))
        }
        other => other,
    })
}

pub fn read_barcodes(path: &Utf8Path) -> Result<Vec<String>, ExportError> {
    info!("loading barcodes {path}");
    let mut barcodes = Vec::new();
    for line in open_reader(path)?.lines() {
        let line = line.map_err(|err| ExportError::Filesystem(format!("{path}: {err}")))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            barcodes.push(trimmed.to_string());
        }
    }
    Ok(barcodes)
}

pub fn parse_matrix<R: BufRead>(reader: R) -> Result<SparseMatrix, ExportError> {
    let mut lines = reader.lines();

    let banner = next_line(&mut lines)?
        .ok_or_else(|| ExportError::MatrixFormat("empty matrix file".to_string()))?;
    check_banner(&banner)?;

    let size = loop {
        let line = next_line(&mut lines)?
            .ok_or_else(|| ExportError::MatrixFormat("missing size line".to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        break trimmed.to_string();
    };
    let (rows, cols, declared) = parse_size(&size)?;

    let mut entries = Vec::with_capacity(declared.min(1 << 20));
    while let Some(line) = next_line(&mut lines)? {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        entries.push(parse_entry(trimmed, rows, cols)?);
    }
    if entries.len() != declared {
        return Err(ExportError::MatrixFormat(format!(
            "size line declares {declared} entries, found {}",
            entries.len()
        )));
    }
    Ok(SparseMatrix {
        rows,
        cols,
        entries,
    })
}

pub fn render_matrix(matrix: &SparseMatrix) -> String {
    let mut out = String::with_capacity(64 + matrix.entries.len() * 16);
    out.push_str("%%MatrixMarket matrix coordinate real general\n");
    out.push_str(&format!(
        "{} {} {}\n",
        matrix.rows,
        matrix.cols,
        matrix.entries.len()
    ));
    for (row, col, value) in &matrix.entries {
        out.push_str(&format!("{} {} {value}\n", row + 1, col + 1));
    }
    out
}

fn open_reader(path: &Utf8Path) -> Result<Box<dyn BufRead>, ExportError> {
    let file =
        File::open(path).map_err(|err| ExportError::Filesystem(format!("{path}: {err}")))?;
    if path.extension() == Some("gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn next_line<R: BufRead>(lines: &mut Lines<R>) -> Result<Option<String>, ExportError> {
    lines
        .next()
        .transpose()
        .map_err(|err| ExportError::Filesystem(err.to_string()))
}

fn check_banner(banner: &str) -> Result<(), ExportError> {
    let tokens: Vec<String> = banner
        .split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect();
    if tokens.first().map(String::as_str) != Some("%%matrixmarket") {
        return Err(ExportError::MatrixFormat(
            "missing %%MatrixMarket banner".to_string(),
        ));
    }
    if tokens.get(1).map(String::as_str) != Some("matrix")
        || tokens.get(2).map(String::as_str) != Some("coordinate")
    {
        return Err(ExportError::MatrixFormat(
            "only coordinate matrices are supported".to_string(),
        ));
    }
    match tokens.get(3).map(String::as_str) {
        Some("real" | "integer") => {}
        other => {
            return Err(ExportError::MatrixFormat(format!(
                "unsupported value field {}",
                other.unwrap_or("<missing>")
            )));
        }
    }
    match tokens.get(4).map(String::as_str) {
        Some("general") => Ok(()),
        other => Err(ExportError::MatrixFormat(format!(
            "unsupported symmetry {}",
            other.unwrap_or("<missing>")
        ))),
    }
}

fn parse_size(line: &str) -> Result<(usize, usize, usize), ExportError> {
    let mut numbers = line.split_whitespace().map(str::parse::<usize>);
    match (numbers.next(), numbers.next(), numbers.next(), numbers.next()) {
        (Some(Ok(rows)), Some(Ok(cols)), Some(Ok(nnz)), None) => Ok((rows, cols, nnz)),
        _ => Err(ExportError::MatrixFormat(format!(
            "malformed size line {line:?}"
        ))),
    }
}

fn parse_entry(line: &str, rows: usize, cols: usize) -> Result<(usize, usize, f64), ExportError> {
    let mut tokens = line.split_whitespace();
    let (Some(row), Some(col), Some(value), None) = (
        tokens.next(),
        tokens.next(),
        tokens.next(),
        tokens.next(),
    ) else {
        return Err(ExportError::MatrixFormat(format!(
            "malformed entry {line:?}"
        )));
    };
    let row: usize = row
        .parse()
        .map_err(|_| ExportError::MatrixFormat(format!("malformed entry {line:?}")))?;
    let col: usize = col
        .parse()
        .map_err(|_| ExportError::MatrixFormat(format!("malformed entry {line:?}")))?;
    let value: f64 = value
        .parse()
        .map_err(|_| ExportError::MatrixFormat(format!("malformed entry {line:?}")))?;
    if row == 0 || row > rows || col == 0 || col > cols {
        return Err(ExportError::MatrixFormat(format!(
            "entry {line:?} is outside a {rows} x {cols} matrix"
        )));
    }
    Ok((row - 1, col - 1, value))
}
