//! Component construction from a validated [`MigrationConfig`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use archivist_state::{LedgerBackend, PostgresLedgerBackend, SqliteLedgerBackend};
use archivist_types::classification::ClassificationPolicy;
use archivist_types::ledger::MigrationId;
use archivist_types::record::RecordId;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::archive::{
    ArchiveGateway, FilesystemObjectStore, KeyTemplate, MemoryObjectStore, ObjectStore,
};
use crate::classifier::Classifier;
use crate::config::types::{
    archivist_home, ArchiveBackendKind, ArchiveConfig, LedgerBackendKind, LedgerConfig,
    MigrationConfig, SourceConfig, SourceKind,
};
use crate::errors::MigrationError;
use crate::locks::IdLocks;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::result::{CheckResult, RunSummary};
use crate::router::ReadRouter;
use crate::source::{MemoryRecordStore, PostgresRecordStore, RecordStore};

/// Shared handles for one configured migration.
#[derive(Clone)]
pub struct Components {
    pub store: Arc<dyn RecordStore>,
    pub gateway: ArchiveGateway,
    pub ledger: Arc<dyn LedgerBackend>,
    pub locks: IdLocks,
}

#[must_use]
pub fn create_record_store(config: &SourceConfig) -> Arc<dyn RecordStore> {
    match config.kind {
        SourceKind::Postgres => Arc::new(PostgresRecordStore::new(config.clone())),
        SourceKind::Memory => Arc::new(MemoryRecordStore::with_records(config.records.clone())),
    }
}

/// # Errors
///
/// Fails if the filesystem container cannot be created.
pub fn create_object_store(config: &ArchiveConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        ArchiveBackendKind::Filesystem => {
            let dir = config.container_dir();
            let store = FilesystemObjectStore::open(&dir)
                .with_context(|| format!("Failed to open archive container {}", dir.display()))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        }
        ArchiveBackendKind::Memory => Ok(Arc::new(MemoryObjectStore::new()) as Arc<dyn ObjectStore>),
    }
}

/// # Errors
///
/// Fails on an invalid key template or an unusable container.
pub fn create_archive(config: &ArchiveConfig) -> Result<ArchiveGateway> {
    let template = KeyTemplate::parse(&config.key_template)
        .map_err(|e| anyhow::anyhow!("archive.key_template: {e}"))?;
    let store = create_object_store(config)?;
    Ok(ArchiveGateway::new(store, template, config.existing_objects))
}

fn default_ledger_path() -> PathBuf {
    archivist_home().join("ledger.db")
}

/// Open the ledger backend. Blocking; see [`open_ledger`] for async callers.
///
/// # Errors
///
/// Fails if the ledger database cannot be opened or initialized.
pub fn create_ledger_backend(config: &LedgerConfig) -> Result<Arc<dyn LedgerBackend>> {
    match config.backend {
        LedgerBackendKind::Sqlite => {
            let backend = if let Some(path) = &config.connection {
                SqliteLedgerBackend::open(Path::new(path)).context("Failed to open ledger DB")?
            } else {
                SqliteLedgerBackend::open(&default_ledger_path())
                    .context("Failed to open default ledger DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn LedgerBackend>)
        }
        LedgerBackendKind::Postgres => {
            let connstr = config
                .connection
                .as_deref()
                .unwrap_or("host=localhost dbname=archivist_ledger");
            let backend = PostgresLedgerBackend::open(connstr)
                .map_err(|e| anyhow::anyhow!("failed to open Postgres ledger backend: {e}"))?;
            Ok(Arc::new(backend) as Arc<dyn LedgerBackend>)
        }
    }
}

/// Open the ledger on the blocking pool. The synchronous Postgres client
/// cannot be created on a runtime thread.
///
/// # Errors
///
/// Fails if the ledger cannot be opened.
pub async fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn LedgerBackend>> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || create_ledger_backend(&config))
        .await
        .map_err(|e| anyhow::anyhow!("open_ledger task panicked: {e}"))?
}

/// Build every component a migration needs.
///
/// # Errors
///
/// Fails if the archive or ledger cannot be opened.
pub async fn resolve(config: &MigrationConfig) -> Result<Components> {
    let store = create_record_store(&config.source);
    let gateway = create_archive(&config.archive)?;
    let ledger = open_ledger(&config.ledger).await?;
    tracing::debug!(
        migration = config.migration.as_str(),
        source = ?config.source.kind,
        archive = ?config.archive.backend,
        ledger = ?config.ledger.backend,
        "Resolved migration components"
    );
    Ok(Components {
        store,
        gateway,
        ledger,
        locks: IdLocks::new(),
    })
}

/// Orchestrator for `config`, with the retention threshold resolved now.
///
/// # Errors
///
/// Fails if the retention rule is invalid.
pub fn build_orchestrator(
    config: &MigrationConfig,
    components: &Components,
    options: RunOptions,
) -> Result<Orchestrator> {
    let threshold = config.classification.resolve_threshold(Utc::now())?;
    let classifier = Classifier::new(config.classification.policy, threshold);
    Ok(Orchestrator::new(
        MigrationId::new(config.migration.as_str()),
        components.store.clone(),
        components.gateway.clone(),
        components.ledger.clone(),
        classifier,
    )
    .with_scan_scope(config.classification.scan_scope)
    .with_page_size(config.source.page_size)
    .with_workers(config.resources.workers)
    .with_retry_policy(config.resources.retry_policy())
    .with_max_store_failures(config.resources.max_consecutive_store_failures)
    .with_locks(components.locks.clone())
    .with_options(options))
}

/// # Errors
///
/// Fails if the retention rule is invalid.
pub fn build_router(config: &MigrationConfig, components: &Components) -> Result<ReadRouter> {
    Ok(ReadRouter::new(
        components.store.clone(),
        components.gateway.clone(),
        config.classification.policy,
        config.classification.retention()?,
    ))
}

/// Resolve components and run one migration.
///
/// # Errors
///
/// Returns the orchestrator's error, or `Infrastructure` if components
/// cannot be built.
pub async fn run_migration(
    config: &MigrationConfig,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<RunSummary, MigrationError> {
    let components = resolve(config).await?;
    let orchestrator = build_orchestrator(config, &components, options)?;
    orchestrator.run(cancel).await
}

/// Probe the source, archive and ledger without migrating anything.
pub async fn check_components(config: &MigrationConfig) -> CheckResult {
    let mut result = CheckResult::default();

    result.source_ok = match config.source.kind {
        SourceKind::Postgres => match PostgresRecordStore::new(config.source.clone()).check().await {
            Ok(()) => true,
            Err(e) => {
                result.errors.push(format!("source: {e}"));
                false
            }
        },
        SourceKind::Memory => true,
    };
    if result.source_ok {
        tracing::info!("Record store: OK");
    }

    result.archive_ok = match create_archive(&config.archive) {
        Ok(gateway) => match gateway.exists(RecordId::new(0)).await {
            Ok(_) => true,
            Err(e) => {
                result.errors.push(format!("archive: {e}"));
                false
            }
        },
        Err(e) => {
            result.errors.push(format!("archive: {e:#}"));
            false
        }
    };
    if result.archive_ok {
        tracing::info!("Object store: OK");
    }

    let migration = MigrationId::new(config.migration.as_str());
    result.ledger_ok = match open_ledger(&config.ledger).await {
        Ok(ledger) => {
            let probe = tokio::task::spawn_blocking(move || ledger.get_resume_cursor(&migration))
                .await
                .map_err(|e| anyhow::anyhow!("ledger probe task panicked: {e}"))
                .and_then(|r| r.map_err(anyhow::Error::from));
            match probe {
                Ok(_) => true,
                Err(e) => {
                    result.errors.push(format!("ledger: {e:#}"));
                    false
                }
            }
        }
        Err(e) => {
            result.errors.push(format!("ledger: {e:#}"));
            false
        }
    };
    if result.ledger_ok {
        tracing::info!("Ledger: OK");
    }

    for error in &result.errors {
        tracing::error!("Check failed: {error}");
    }
    result
}

/// Classification policy and threshold as they would apply now.
///
/// # Errors
///
/// Fails if the retention rule is invalid.
pub fn current_classifier(config: &MigrationConfig) -> Result<Classifier> {
    let threshold = config.classification.resolve_threshold(Utc::now())?;
    Ok(Classifier::new(config.classification.policy, threshold))
}
