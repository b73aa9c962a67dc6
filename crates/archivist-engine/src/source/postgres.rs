//! `PostgreSQL` record store over `tokio-postgres`.
//!
//! Rows are read with keyset pagination. The id, modification time and
//! optional activity flag are selected as typed columns; the whole row is
//! captured with `row_to_json` so business columns pass through untouched.

use std::fmt::Write as _;
use std::sync::Arc;

use archivist_types::classification::{ClassificationPolicy, Predicate};
use archivist_types::error::ArchiveError;
use archivist_types::record::{Record, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pg_escape::quote_identifier;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row};

use super::{Candidate, MalformedRow, RecordStore};
use crate::classifier::CandidateFilter;
use crate::config::types::SourceConfig;

/// Lazily connected, read-only client for the customer table.
pub struct PostgresRecordStore {
    config: SourceConfig,
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresRecordStore {
    /// Create a store; the connection is opened on first use.
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    /// Open the connection now and run a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the database can't be reached.
    pub async fn check(&self) -> Result<(), ArchiveError> {
        let client = self.client().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| unavailable("CONNECTION_TEST_FAILED", &e))?;
        Ok(())
    }

    async fn client(&self) -> Result<Arc<Client>, ArchiveError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
            tracing::warn!(
                host = self.config.host,
                database = self.config.database,
                "Record store connection closed, reconnecting"
            );
        }
        let client = Arc::new(self.connect().await?);
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn connect(&self) -> Result<Client, ArchiveError> {
        let mut pg = PgConfig::new();
        pg.host(&self.config.host);
        pg.port(self.config.port);
        pg.user(&self.config.user);
        if !self.config.password.is_empty() {
            pg.password(&self.config.password);
        }
        pg.dbname(&self.config.database);

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| unavailable("CONNECTION_FAILED", &e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        // Naive timestamps are interpreted as UTC.
        client
            .batch_execute("SET TIME ZONE 'UTC'")
            .await
            .map_err(|e| unavailable("SESSION_SETUP_FAILED", &e))?;

        tracing::info!(
            host = self.config.host,
            port = self.config.port,
            database = self.config.database,
            table = self.config.table,
            "Connected to record store"
        );
        Ok(client)
    }

    fn select_list(&self) -> String {
        let columns = &self.config.columns;
        let active = columns.active.as_deref().map_or_else(
            || "NULL::boolean".to_string(),
            |c| format!("t.{}::boolean", quote_identifier(c)),
        );
        format!(
            "t.{id}::bigint, t.{lm}::timestamptz, {active}, row_to_json(t) FROM {table} t",
            id = quote_identifier(&columns.id),
            lm = quote_identifier(&columns.last_modified),
            table = quote_identifier(&self.config.table),
        )
    }

    /// SQL for a page. Placeholders: `$1` after id (NULL for the first
    /// page), `$2` limit, `$3` threshold (only when the predicate needs it).
    fn page_query(&self, filter: &CandidateFilter) -> (String, bool) {
        let columns = &self.config.columns;
        let id = quote_identifier(&columns.id);
        let lm = format!("t.{}::timestamptz", quote_identifier(&columns.last_modified));
        let active = columns
            .active
            .as_deref()
            .map(|c| format!("t.{}", quote_identifier(c)));

        let (predicate, uses_threshold) = match (filter.predicate, filter.classifier.policy()) {
            (Predicate::All, _) => ("TRUE".to_string(), false),
            (Predicate::Active, ClassificationPolicy::FlagAndAge) => match &active {
                Some(flag) => (format!("COALESCE({flag}, TRUE)"), false),
                None => ("TRUE".to_string(), false),
            },
            (Predicate::LegacyCandidate, ClassificationPolicy::FlagAndAge) => match &active {
                Some(flag) => (format!("({flag} = FALSE OR {lm} < $3)"), true),
                None => (format!("{lm} < $3"), true),
            },
            (Predicate::Active, ClassificationPolicy::AgeOnly) => (format!("{lm} >= $3"), true),
            (Predicate::LegacyCandidate, ClassificationPolicy::AgeOnly) => {
                (format!("{lm} < $3"), true)
            }
        };

        let mut sql = format!("SELECT {}", self.select_list());
        let _ = write!(
            sql,
            " WHERE t.{id} IS NOT NULL AND ($1::bigint IS NULL OR t.{id}::bigint > $1) \
             AND {predicate} ORDER BY t.{id} LIMIT $2"
        );
        (sql, uses_threshold)
    }

    /// Decode a page row. Only an unreadable id fails the page, since
    /// without it the keyset cannot move past the row.
    fn decode_candidate(&self, row: &Row) -> Result<Candidate, ArchiveError> {
        let id: i64 = row
            .try_get(0)
            .map_err(|e| ArchiveError::serialization("BAD_ID", e.to_string()))?;
        match self.decode_row(row) {
            Ok(record) => Ok(Candidate::Record(record)),
            Err(error) => {
                tracing::warn!(
                    table = self.config.table,
                    id,
                    code = error.code.as_str(),
                    "Undecodable record row: {}",
                    error.message
                );
                Ok(Candidate::Malformed(MalformedRow {
                    id: RecordId::new(id),
                    last_modified: row.try_get(1).ok(),
                    error,
                }))
            }
        }
    }

    fn decode_row(&self, row: &Row) -> Result<Record, ArchiveError> {
        let id: i64 = row
            .try_get(0)
            .map_err(|e| ArchiveError::serialization("BAD_ID", e.to_string()))?;
        let last_modified: DateTime<Utc> = row.try_get(1).map_err(|e| {
            ArchiveError::serialization("BAD_LAST_MODIFIED", format!("record {id}: {e}"))
        })?;
        let is_active: Option<bool> = row.try_get(2).map_err(|e| {
            ArchiveError::serialization("BAD_ACTIVE_FLAG", format!("record {id}: {e}"))
        })?;
        let json: serde_json::Value = row.try_get(3).map_err(|e| {
            ArchiveError::serialization("BAD_ROW", format!("record {id}: {e}"))
        })?;

        let serde_json::Value::Object(mut attributes) = json else {
            return Err(ArchiveError::serialization(
                "BAD_ROW",
                format!("record {id}: row_to_json did not return an object"),
            ));
        };
        let columns = &self.config.columns;
        attributes.remove(&columns.id);
        attributes.remove(&columns.last_modified);
        if let Some(active) = &columns.active {
            attributes.remove(active);
        }

        Ok(Record {
            id: RecordId::new(id),
            last_modified,
            is_active,
            attributes: attributes.into_iter().collect(),
        })
    }
}

fn unavailable(code: &str, e: &tokio_postgres::Error) -> ArchiveError {
    ArchiveError::store_unavailable(code, e.to_string())
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Candidate>, ArchiveError> {
        let client = self.client().await?;
        let (sql, uses_threshold) = self.page_query(filter);
        let after: Option<i64> = after.map(RecordId::get);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let threshold = filter.classifier.threshold();

        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&after, &limit];
        if uses_threshold {
            params.push(&threshold);
        }

        let rows = client
            .query(sql.as_str(), &params)
            .await
            .map_err(|e| unavailable("QUERY_FAILED", &e))?;
        tracing::debug!(
            table = self.config.table,
            predicate = %filter.predicate,
            after,
            rows = rows.len(),
            "Fetched record page"
        );
        rows.iter().map(|row| self.decode_candidate(row)).collect()
    }

    async fn get(&self, id: RecordId) -> Result<Option<Record>, ArchiveError> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} WHERE t.{}::bigint = $1",
            self.select_list(),
            quote_identifier(&self.config.columns.id)
        );
        let rows = client
            .query(sql.as_str(), &[&id.get()])
            .await
            .map_err(|e| unavailable("QUERY_FAILED", &e))?;
        rows.first().map(|row| self.decode_row(row)).transpose()
    }
}
