use std::env;
use std::thread;

use clap::ValueEnum;

use crate::error::ExportError;

pub const INGEST_API_VAR: &str = "INGEST_API";
pub const SCHEMA_VERSION_VAR: &str = "UNS_SCHEMA_VERSION";

const DEFAULT_INGEST_API: &str = "https://api.ingest.archive.data.humancellatlas.org";
const DEFAULT_RESOLVER_WORKERS: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LibPrepPolicy {
    #[default]
    Omit,
    KeepFirst,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub ingest_api: String,
    pub resolver_workers: usize,
    pub assembly_workers: usize,
    pub lib_prep_policy: LibPrepPolicy,
    pub on_failure: FailurePolicy,
    pub schema_version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ingest_api: Option<String>,
    pub resolver_workers: Option<usize>,
    pub assembly_workers: Option<usize>,
    pub lib_prep_policy: Option<LibPrepPolicy>,
    pub on_failure: Option<FailurePolicy>,
}

impl RunConfig {
    pub fn resolve(overrides: Overrides) -> Result<RunConfig, ExportError> {
        Self::resolve_from(overrides, |name| env::var(name).ok())
    }

    fn resolve_from(
        overrides: Overrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<RunConfig, ExportError> {
        let ingest_api = overrides
            .ingest_api
            .or_else(|| lookup(INGEST_API_VAR))
            .unwrap_or_else(|| DEFAULT_INGEST_API.to_string());
        if ingest_api.trim().is_empty() {
            return Err(ExportError::Config(
                "ingest api url must not be empty".to_string(),
            ));
        }

        let resolver_workers = overrides
            .resolver_workers
            .unwrap_or(DEFAULT_RESOLVER_WORKERS);
        if resolver_workers == 0 {
            return Err(ExportError::Config(
                "resolver workers must be at least 1".to_string(),
            ));
        }

        let assembly_workers = match overrides.assembly_workers {
            Some(0) => {
                return Err(ExportError::Config(
                    "assembly workers must be at least 1".to_string(),
                ));
            }
            Some(workers) => workers,
            None => thread::available_parallelism().map(usize::from).unwrap_or(1),
        };

        Ok(RunConfig {
            ingest_api,
            resolver_workers,
            assembly_workers,
            lib_prep_policy: overrides.lib_prep_policy.unwrap_or_default(),
            on_failure: overrides.on_failure.unwrap_or_default(),
            schema_version: lookup(SCHEMA_VERSION_VAR).filter(|value| !value.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_apply_without_flags_or_environment() {
        let config = RunConfig::resolve_from(Overrides::default(), no_env).unwrap();
        assert_eq!(config.ingest_api, DEFAULT_INGEST_API);
        assert_eq!(config.resolver_workers, 8);
        assert!(config.assembly_workers >= 1);
        assert_eq!(config.lib_prep_policy, LibPrepPolicy::Omit);
        assert_eq!(config.on_failure, FailurePolicy::Skip);
        assert_eq!(config.schema_version, None);
    }

    #[test]
    fn environment_fills_in_behind_flags() {
        let lookup = |name: &str| match name {
            INGEST_API_VAR => Some("https://staging.example.org/".to_string()),
            SCHEMA_VERSION_VAR => Some("2.0.0".to_string()),
            _ => None,
        };

        let from_env = RunConfig::resolve_from(Overrides::default(), lookup).unwrap();
        assert_eq!(from_env.ingest_api, "https://staging.example.org/");
        assert_eq!(from_env.schema_version.as_deref(), Some("2.0.0"));

        let flagged = RunConfig::resolve_from(
            Overrides {
                ingest_api: Some("http://localhost:8080".to_string()),
                resolver_workers: Some(2),
                ..Overrides::default()
            },
            lookup,
        )
        .unwrap();
        assert_eq!(flagged.ingest_api, "http://localhost:8080");
        assert_eq!(flagged.resolver_workers, 2);
    }

    #[test]
    fn zero_workers_are_rejected() {
        let err = RunConfig::resolve_from(
            Overrides {
                resolver_workers: Some(0),
                ..Overrides::default()
            },
            no_env,
        )
        .unwrap_err();
        assert_matches!(err, ExportError::Config(_));

        let err = RunConfig::resolve_from(
            Overrides {
                assembly_workers: Some(0),
                ..Overrides::default()
            },
            no_env,
        )
        .unwrap_err();
        assert_matches!(err, ExportError::Config(_));
    }

    #[test]
    fn blank_schema_version_counts_as_absent() {
        let lookup = |name: &str| match name {
            SCHEMA_VERSION_VAR => Some("  ".to_string()),
            _ => None,
        };
        let config = RunConfig::resolve_from(Overrides::default(), lookup).unwrap();
        assert_eq!(config.schema_version, None);
    }
}
