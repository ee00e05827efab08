pub mod assemble;
pub mod batch;
pub mod bundle;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod matrix;
pub mod observation;
pub mod report;
pub mod tabular;
