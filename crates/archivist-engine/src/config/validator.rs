//! Semantic validation for parsed migration configuration values.

use anyhow::{bail, Result};
use archivist_types::record::RecordId;

use crate::archive::{validate_key, KeyTemplate};
use crate::config::types::{LedgerBackendKind, MigrationConfig, SourceKind};

const MAX_WORKERS: usize = 64;
const MAX_PAGE_SIZE: usize = 10_000;
const MAX_RETENTION_DAYS: u32 = 36_500;

fn validate_identifier(value: &str, context: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(format!("{context} must not be empty"));
    } else if value.len() > 63 {
        errors.push(format!("{context} '{value}' exceeds PostgreSQL 63-byte limit"));
    }
}

fn validate_source(config: &MigrationConfig, errors: &mut Vec<String>) {
    let source = &config.source;
    if source.page_size == 0 || source.page_size > MAX_PAGE_SIZE {
        errors.push(format!(
            "source.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
            source.page_size
        ));
    }

    match source.kind {
        SourceKind::Postgres => {
            if source.host.trim().is_empty() {
                errors.push("source.host must not be empty".to_string());
            }
            if source.database.trim().is_empty() {
                errors.push("source.database must not be empty".to_string());
            }
            validate_identifier(&source.table, "source.table", errors);
            validate_identifier(&source.columns.id, "source.columns.id", errors);
            validate_identifier(
                &source.columns.last_modified,
                "source.columns.last_modified",
                errors,
            );
            if let Some(active) = &source.columns.active {
                validate_identifier(active, "source.columns.active", errors);
            }
            if !source.records.is_empty() {
                errors.push("source.records is only allowed with kind 'memory'".to_string());
            }
        }
        SourceKind::Memory => {
            let mut ids: Vec<RecordId> = source.records.iter().map(|r| r.id).collect();
            ids.sort_unstable();
            if ids.windows(2).any(|w| w[0] == w[1]) {
                errors.push("source.records contains duplicate ids".to_string());
            }
        }
    }
}

fn validate_archive(config: &MigrationConfig, errors: &mut Vec<String>) {
    let archive = &config.archive;
    let container = archive.container.trim();
    if container.is_empty() {
        errors.push("archive.container must not be empty".to_string());
    } else if container.contains('/') || container.contains('\\') || container == "." || container == ".." {
        errors.push(format!(
            "archive.container '{}' must be a single path segment",
            archive.container
        ));
    }

    match KeyTemplate::parse(&archive.key_template) {
        Ok(template) => {
            let sample = template.render(RecordId::new(42));
            if let Err(e) = validate_key(&sample) {
                errors.push(format!(
                    "archive.key_template '{}' renders an invalid key: {}",
                    archive.key_template, e.message
                ));
            }
        }
        Err(e) => errors.push(format!("archive.key_template: {e}")),
    }
}

/// Validate a parsed migration configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_migration(config: &MigrationConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported migration version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.migration.trim().is_empty() {
        errors.push("Migration name must not be empty".to_string());
    } else if !config
        .migration
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        errors.push(format!(
            "Migration name '{}' may only contain letters, digits, '_' and '-'",
            config.migration
        ));
    }

    validate_source(config, &mut errors);

    let classification = &config.classification;
    match (classification.retention_threshold, classification.retention_days) {
        (None, None) => errors.push(
            "classification requires one of retention_threshold or retention_days".to_string(),
        ),
        (Some(_), Some(_)) => errors.push(
            "classification.retention_threshold and retention_days are mutually exclusive"
                .to_string(),
        ),
        (None, Some(days)) if days == 0 || days > MAX_RETENTION_DAYS => {
            errors.push(format!(
                "classification.retention_days must be between 1 and {MAX_RETENTION_DAYS}, got {days}"
            ));
        }
        _ => {}
    }

    validate_archive(config, &mut errors);

    if config.ledger.backend == LedgerBackendKind::Postgres && config.ledger.connection.is_none() {
        errors.push("ledger backend 'postgres' requires a connection string".to_string());
    }

    let resources = &config.resources;
    if resources.workers == 0 || resources.workers > MAX_WORKERS {
        errors.push(format!(
            "resources.workers must be between 1 and {MAX_WORKERS}, got {}",
            resources.workers
        ));
    }
    if resources.max_attempts == 0 {
        errors.push("resources.max_attempts must be at least 1".to_string());
    }
    if resources.backoff_base_ms == 0 {
        errors.push("resources.backoff_base_ms must be > 0".to_string());
    }
    if resources.backoff_base_ms > resources.backoff_max_ms {
        errors.push("resources.backoff_base_ms must not exceed backoff_max_ms".to_string());
    }
    if resources.max_consecutive_store_failures == 0 {
        errors.push("resources.max_consecutive_store_failures must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Migration validation failed:\n  - {}", errors.join("\n  - "));
    }
}
