pub mod check;
pub mod failures;
pub mod get;
pub mod migrate;
pub mod serve;

use std::path::Path;

use anyhow::{Context, Result};
use archivist_engine::config::types::MigrationConfig;
use archivist_engine::config::{parser, validator};

/// Parse and validate a migration file.
pub(crate) fn load_migration(path: &Path) -> Result<MigrationConfig> {
    let config = parser::parse_migration(path)
        .with_context(|| format!("Failed to parse migration: {}", path.display()))?;
    validator::validate_migration(&config)?;
    Ok(config)
}
