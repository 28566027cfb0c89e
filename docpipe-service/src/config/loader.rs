//! Configuration loading from files and environment variables.

use ::config::{Config, Environment, File};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

use super::PipelineConfig;

/// Load configuration from an optional file and `DOCPIPE__*` env vars.
///
/// Without an explicit path, a `docpipe.{toml,yaml,json}` in the working
/// directory is used when present.
pub fn load_config(path: Option<&Path>) -> PipelineResult<PipelineConfig> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("docpipe").required(false),
    };

    Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("DOCPIPE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| PipelineError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| PipelineError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
}
