pub mod archive;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod file_reference;
pub mod filters;
pub mod graphql;
pub mod job;
pub mod keys;
pub mod logging;
pub mod pool;
pub mod progress;
pub mod records;
pub mod transfer;

pub use client::GwCloud;
pub use error::GwCloudError;
