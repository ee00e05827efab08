use std::io::{self, Write};

use serde::Serialize;

use crate::assemble::BlockFailure;
use crate::batch::Outcome;
use crate::chain::Warning;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub uuid: String,
    pub kind: String,
    pub message: String,
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub operation: String,
    pub generated_at: String,
    pub rows: usize,
    pub resolved: usize,
    pub failed: Vec<FailureEntry>,
    pub warnings: Vec<Warning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cells: Option<usize>,
    pub outputs: Vec<String>,
}

impl RunReport {
    pub fn new(operation: &str, rows: usize) -> Self {
        Self {
            operation: operation.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            rows,
            resolved: 0,
            failed: Vec::new(),
            warnings: Vec::new(),
            cells: None,
            outputs: Vec::new(),
        }
    }

    pub fn record_outcomes(&mut self, outcomes: &[Outcome]) {
        for (at, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Ok(resolved) => {
                    self.resolved += 1;
                    for warning in &resolved.warnings {
                        if !self.warnings.contains(warning) {
                            self.warnings.push(warning.clone());
                        }
                    }
                }
                Err(failure) => {
                    self.push_failure(&failure.uuid, failure.kind, &failure.message, at + 1);
                }
            }
        }
    }

    pub fn record_block_failure(&mut self, failure: &BlockFailure) {
        self.push_failure(
            &failure.uuid,
            failure.error.kind(),
            &failure.error.to_string(),
            failure.row + 1,
        );
    }

    pub fn record_output(&mut self, path: impl Into<String>) {
        self.outputs.push(path.into());
    }

    pub fn failed_rows(&self) -> usize {
        self.failed.iter().map(|entry| entry.rows.len()).sum()
    }

    pub fn print(&self) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }

    fn push_failure(&mut self, uuid: &str, kind: &str, message: &str, row: usize) {
        if let Some(entry) = self
            .failed
            .iter_mut()
            .find(|entry| entry.uuid == uuid && entry.kind == kind && entry.message == message)
        {
            entry.rows.push(row);
            return;
        }
        self.failed.push(FailureEntry {
            uuid: uuid.to_string(),
            kind: kind.to_string(),
            message: message.to_string(),
            rows: vec![row],
        });
    }
}
