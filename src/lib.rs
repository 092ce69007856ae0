pub mod chunker;
pub mod cli;
pub mod config;
pub mod embed;
pub mod engine;
pub mod images;
pub mod ingest;
pub mod nodes;
pub mod page_extract;
pub mod pipeline;
pub mod postprocess;
pub mod processor;
pub mod report;
pub mod store;
pub mod triage;
pub mod util;
