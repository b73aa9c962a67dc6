use std::path::Path;

use anyhow::Result;
use archivist_engine::resolve;

/// Execute the `check` command: validate migration config and component connectivity.
pub async fn execute(migration_path: &Path) -> Result<()> {
    let config = super::load_migration(migration_path)?;
    println!("Migration structure: OK");

    let classifier = resolve::current_classifier(&config)?;
    println!(
        "Classification:      {:?}, legacy before {}",
        classifier.policy(),
        classifier.threshold()
    );

    let result = resolve::check_components(&config).await;
    print_status("Record store", result.source_ok);
    print_status("Object store", result.archive_ok);
    print_status("Ledger", result.ledger_ok);
    for error in &result.errors {
        println!("  {error}");
    }

    if result.all_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_status(label: &str, ok: bool) {
    println!("{:20} {}", format!("{label}:"), if ok { "OK" } else { "FAILED" });
}
