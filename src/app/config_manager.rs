//! Configuration lifecycle: load file config, merge CLI, produce the engine config.

use std::path::PathBuf;

use anyhow::Result;

use crate::app::config_runtime::{self, CliValueSources, EngineConfig};
use crate::app_config::load_default_file_config;
use crate::cli::Args;

/// Resolved configuration bundle.
pub(crate) struct ResolvedConfig {
    pub(crate) engine: EngineConfig,
    /// Config file that was read, if any.
    pub(crate) config_path: Option<PathBuf>,
}

/// Loads the default config file and merges CLI overrides into an [`EngineConfig`].
pub(crate) fn resolve_config(args: &Args, cli_sources: &CliValueSources) -> Result<ResolvedConfig> {
    let loaded = load_default_file_config()?;
    let engine =
        config_runtime::resolve_engine_config(args, cli_sources, loaded.config.as_ref())?;
    Ok(ResolvedConfig {
        engine,
        config_path: loaded.path.filter(|_| loaded.loaded_from_file),
    })
}
