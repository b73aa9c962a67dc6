mod container;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use archivist_engine::config::parser;
use archivist_engine::config::types::MigrationConfig;
use archivist_engine::config::validator;
use archivist_engine::{resolve, Components, RunOptions, RunSummary};
use chrono::{DateTime, Utc};
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct HarnessContext {
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_db: String,
    pub postgres_user: String,
    pub postgres_pass: String,
}

/// Where a test run keeps its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerChoice {
    Sqlite,
    Postgres,
}

/// A per-test customer table plus scratch space for the archive and ledger.
pub struct MigrationFixture {
    pub table: String,
    pub migration: String,
    pub workdir: tempfile::TempDir,
    pub ledger: LedgerChoice,
}

impl MigrationFixture {
    #[must_use]
    pub fn archive_root(&self) -> PathBuf {
        self.workdir.path().join("objects")
    }

    /// Path of the archived document for `id` under the default template.
    #[must_use]
    pub fn object_path(&self, id: i64) -> PathBuf {
        self.archive_root()
            .join("legacy-data")
            .join(format!("customer-{id}.json"))
    }

    fn ledger_path(&self) -> PathBuf {
        self.workdir.path().join("ledger.db")
    }
}

pub async fn bootstrap() -> Result<HarnessContext> {
    let postgres_port = container::shared_postgres_port()?;

    Ok(HarnessContext {
        postgres_host: "127.0.0.1".to_string(),
        postgres_port,
        postgres_db: "postgres".to_string(),
        postgres_user: "postgres".to_string(),
        postgres_pass: "postgres".to_string(),
    })
}

impl HarnessContext {
    fn conn_str(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.postgres_host,
            self.postgres_port,
            self.postgres_user,
            self.postgres_pass,
            self.postgres_db
        )
    }

    /// Create an empty customer table unique to `test_name`.
    pub async fn allocate_fixture(
        &self,
        test_name: &str,
        ledger: LedgerChoice,
    ) -> Result<MigrationFixture> {
        let table_id = NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed);
        let table = format!("customers_{}_{}", sanitize_identifier(test_name), table_id);

        let client = self.connect().await?;
        client
            .batch_execute(&format!(
                "CREATE TABLE public.\"{table}\" (
                    customer_id BIGINT PRIMARY KEY,
                    updated_at  TIMESTAMPTZ NOT NULL,
                    is_active   BOOLEAN,
                    name        TEXT NOT NULL,
                    email       TEXT,
                    balance     NUMERIC(12,2) NOT NULL DEFAULT 0
                )"
            ))
            .await
            .with_context(|| format!("failed to create source table {table}"))?;

        Ok(MigrationFixture {
            migration: table.clone(),
            table,
            workdir: tempfile::tempdir().context("failed to create work dir")?,
            ledger,
        })
    }

    pub async fn drop_fixture(&self, fixture: &MigrationFixture) -> Result<()> {
        let client = self.connect().await?;
        client
            .execute(
                &format!("DROP TABLE IF EXISTS public.\"{}\" CASCADE", fixture.table),
                &[],
            )
            .await
            .with_context(|| format!("failed to drop source table {}", fixture.table))?;
        Ok(())
    }

    pub async fn insert_customer(
        &self,
        fixture: &MigrationFixture,
        id: i64,
        updated_at: DateTime<Utc>,
        is_active: Option<bool>,
        name: &str,
    ) -> Result<()> {
        let client = self.connect().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO public.\"{}\" (customer_id, updated_at, is_active, name, email)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (customer_id) DO UPDATE
                     SET updated_at = EXCLUDED.updated_at,
                         is_active = EXCLUDED.is_active,
                         name = EXCLUDED.name,
                         email = EXCLUDED.email",
                    fixture.table
                ),
                &[
                    &id,
                    &updated_at,
                    &is_active,
                    &name,
                    &format!("{}@example.com", sanitize_identifier(name)),
                ],
            )
            .await
            .with_context(|| format!("failed to insert customer {id}"))?;
        Ok(())
    }

    /// Migration config for `fixture`: Postgres source, filesystem archive.
    pub fn migration_config(
        &self,
        fixture: &MigrationFixture,
        retention_threshold: DateTime<Utc>,
        extra_resources: Option<&str>,
    ) -> Result<MigrationConfig> {
        let ledger_block = match fixture.ledger {
            LedgerChoice::Sqlite => format!(
                "  backend: sqlite\n  connection: \"{}\"",
                fixture.ledger_path().display()
            ),
            LedgerChoice::Postgres => format!(
                "  backend: postgres\n  connection: \"{}\"",
                self.conn_str()
            ),
        };
        let yaml = format!(
            r#"
version: "1.0"
migration: {migration}
source:
  kind: postgres
  host: {host}
  port: {port}
  user: {user}
  password: {pass}
  database: {db}
  table: {table}
  columns:
    id: customer_id
    last_modified: updated_at
    active: is_active
  page_size: 3
classification:
  retention_threshold: "{threshold}"
archive:
  backend: filesystem
  root: "{root}"
  container: legacy-data
  existing_objects: skip_identical
ledger:
{ledger_block}
resources:
  workers: 4
  backoff_base_ms: 10
  backoff_max_ms: 100
{extra}
"#,
            migration = fixture.migration,
            host = self.postgres_host,
            port = self.postgres_port,
            user = self.postgres_user,
            pass = self.postgres_pass,
            db = self.postgres_db,
            table = fixture.table,
            threshold = retention_threshold.to_rfc3339(),
            root = fixture.archive_root().display(),
            extra = extra_resources.unwrap_or(""),
        );

        let config = parser::parse_migration_str(&yaml).context("failed to parse e2e migration")?;
        validator::validate_migration(&config)?;
        Ok(config)
    }

    pub async fn run_migration(&self, config: &MigrationConfig) -> Result<RunSummary> {
        let summary =
            archivist_engine::run_migration(config, RunOptions::default(), CancellationToken::new())
                .await?;
        Ok(summary)
    }

    pub async fn components(&self, config: &MigrationConfig) -> Result<Components> {
        resolve::resolve(config).await
    }

    async fn connect(&self) -> Result<tokio_postgres::Client> {
        let (client, connection) = tokio_postgres::connect(&self.conn_str(), NoTls)
            .await
            .context("failed to connect to postgres")?;

        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(client)
    }
}

/// Read an archived document from disk.
pub fn read_object(path: &Path) -> Result<serde_json::Value> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).context("archived object is not valid JSON")
}

fn sanitize_identifier(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
        .collect()
}
