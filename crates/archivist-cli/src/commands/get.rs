use std::path::Path;

use anyhow::Result;
use archivist_engine::resolve;
use archivist_types::record::RecordId;

/// Execute the `get` command: route one id and print the record as JSON.
pub async fn execute(migration_path: &Path, id: i64) -> Result<()> {
    let config = super::load_migration(migration_path)?;
    let components = resolve::resolve(&config).await?;
    let router = resolve::build_router(&config, &components)?;

    let routed = router.route(RecordId::new(id)).await?;
    println!("{}", serde_json::to_string_pretty(&routed)?);
    Ok(())
}
