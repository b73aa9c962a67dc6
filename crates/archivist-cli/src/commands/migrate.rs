use std::path::Path;

use anyhow::Result;
use archivist_engine::{resolve, RunOptions, RunSummary};
use tokio_util::sync::CancellationToken;

/// Execute the `migrate` command: parse, validate, and run one migration pass.
pub async fn execute(migration_path: &Path, from_start: bool, json: bool) -> Result<()> {
    let config = super::load_migration(migration_path)?;

    tracing::info!(
        migration = config.migration,
        source = ?config.source.kind,
        archive = ?config.archive.backend,
        ledger = ?config.ledger.backend,
        workers = config.resources.workers,
        "Migration validated"
    );

    let components = resolve::resolve(&config).await?;
    let orchestrator =
        resolve::build_orchestrator(&config, &components, RunOptions { from_start })?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight uploads");
            on_signal.cancel();
        }
    });

    let summary = orchestrator.run(cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Migration '{}' run {} {}.",
        summary.migration,
        summary.run_id,
        summary.status()
    );
    println!("  Candidates:      {}", summary.candidates);
    println!("  Succeeded:       {}", summary.succeeded);
    println!("  Failed:          {}", summary.failed);
    println!(
        "  Skipped:         {} (already migrated {}, active {}, superseded {})",
        summary.skipped,
        summary.skipped_already_migrated,
        summary.skipped_active,
        summary.skipped_superseded
    );
    if summary.interrupted > 0 {
        println!("  Interrupted:     {}", summary.interrupted);
    }
    println!("  Uploads:         {}", summary.uploads);
    println!("  Bytes uploaded:  {}", format_bytes(summary.bytes_uploaded));
    println!("  Duration:        {:.2}s", summary.duration_secs);
    if let Some(after) = summary.resume_after {
        println!("  Resume after:    {after}");
    }
    if let Some(error) = &summary.error {
        println!("  Error:           {error}");
    }
    if !summary.failures.is_empty() {
        println!("  Failed records:");
        for failure in &summary.failures {
            println!(
                "    {:>10}  {:<17} attempts={}  {}",
                failure.id.get(), failure.category.as_str(), failure.attempts, failure.message
            );
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
