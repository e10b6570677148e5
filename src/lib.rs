pub mod budget;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod games;
pub mod generation;
pub mod logging;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod routes;
pub mod safety;
pub mod store;

pub use error::{PipelineError, Result};
