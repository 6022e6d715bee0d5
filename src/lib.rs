pub mod aggregate;
pub mod buffer;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod publish;
pub mod store;
