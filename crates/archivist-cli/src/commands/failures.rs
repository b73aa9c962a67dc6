use std::path::Path;

use anyhow::Result;
use archivist_engine::resolve;
use archivist_types::ledger::MigrationId;

/// Execute the `failures` command: list records whose latest attempt failed.
pub async fn execute(migration_path: &Path) -> Result<()> {
    let config = super::load_migration(migration_path)?;
    let ledger = resolve::open_ledger(&config.ledger).await?;

    let migration = MigrationId::new(config.migration.as_str());
    let failures = tokio::task::spawn_blocking(move || ledger.list_failures(&migration))
        .await
        .map_err(|e| anyhow::anyhow!("list_failures task panicked: {e}"))??;

    if failures.is_empty() {
        println!("No failed records for migration '{}'.", config.migration);
        return Ok(());
    }

    println!(
        "{} failed record(s) for migration '{}':",
        failures.len(),
        config.migration
    );
    for entry in &failures {
        let category = entry
            .error_category
            .map_or("unknown", |c| c.as_str());
        println!(
            "  {:>10}  {:<17} attempts={:<3} version={}  {}",
            entry.record_id.get(),
            category,
            entry.attempts,
            entry.attempted_last_modified.to_rfc3339(),
            entry.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
