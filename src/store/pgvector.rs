//! Postgres + pgvector backend.

use anyhow::{anyhow, Context, Result};
use pgvector::Vector;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use super::DocumentStore;
use crate::embedder::EmbeddedDocument;

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a table name; both parts must be non-blank.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Schema part.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table part.
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Connection target for [`PgVectorStore`].
#[derive(Debug, Clone)]
pub struct PgVectorConfig {
    /// Connection string.
    pub database_url: String,
    /// Destination table.
    pub table: TableName,
}

/// Postgres + pgvector document store.
pub struct PgVectorStore {
    config: PgVectorConfig,
    client: Option<Client>,
}

impl PgVectorStore {
    /// Validates the config; connecting happens in `connect`.
    pub fn new(config: PgVectorConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.database_url.trim().is_empty(),
            "Postgres connection string is required"
        );
        Ok(Self {
            config,
            client: None,
        })
    }

    fn client(&mut self) -> Result<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| anyhow!("not connected to Postgres"))
    }
}

impl DocumentStore for PgVectorStore {
    async fn connect(&mut self) -> Result<()> {
        let (client, connection) = tokio_postgres::connect(&self.config.database_url, NoTls)
            .await
            .context("failed to connect to Postgres")?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("postgres connection error: {err}");
            }
        });
        client
            .simple_query("SELECT 1")
            .await
            .context("Postgres ping failed")?;
        info!(table = %self.config.table.qualified(), "connected to Postgres");
        self.client = Some(client);
        Ok(())
    }

    async fn prepare(&mut self, dimension: usize) -> Result<()> {
        anyhow::ensure!(dimension > 0, "embedding dimension must be positive");
        let ddl = create_table_sql(&self.config.table, dimension);
        let client = self.client()?;
        client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .context("failed to ensure pgvector extension")?;
        client
            .execute(&ddl, &[])
            .await
            .context("failed to create pgvector table")?;
        Ok(())
    }

    async fn list_index_names(&mut self) -> Result<Vec<String>> {
        let schema = self.config.table.schema().to_string();
        let table = self.config.table.table().to_string();
        let rows = self
            .client()?
            .query(
                "SELECT indexname FROM pg_indexes WHERE schemaname = $1 AND tablename = $2",
                &[&schema, &table],
            )
            .await
            .context("failed to list indexes")?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn create_vector_index(&mut self, name: &str, _dimension: usize) -> Result<()> {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops)",
            quote_ident(name),
            self.config.table.qualified()
        );
        self.client()?
            .execute(&sql, &[])
            .await
            .context("failed to create HNSW index")?;
        info!(index = name, "created vector index");
        Ok(())
    }

    async fn delete_all(&mut self) -> Result<u64> {
        let sql = format!("DELETE FROM {}", self.config.table.qualified());
        self.client()?
            .execute(&sql, &[])
            .await
            .context("failed to clear table")
    }

    async fn insert_many(&mut self, documents: &[EmbeddedDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let sql = insert_sql(&self.config.table);
        let client = self.client()?;
        let transaction = client.transaction().await?;
        let statement = transaction.prepare(&sql).await?;
        for record in documents {
            let doc = &record.document;
            let vector = Vector::from(record.embedding.clone());
            let metadata = Json(doc.metadata.clone());
            let category = doc.category.to_string();
            transaction
                .execute(
                    &statement,
                    &[
                        &doc.entity_id,
                        &category,
                        &doc.season,
                        &doc.text,
                        &metadata,
                        &vector,
                        &doc.created_at,
                        &doc.updated_at,
                    ],
                )
                .await
                .with_context(|| {
                    format!("failed to insert {} document {}", category, doc.entity_id)
                })?;
        }
        transaction.commit().await?;
        Ok(documents.len())
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            info!("disconnected from Postgres");
        }
    }
}

fn create_table_sql(table: &TableName, dimension: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id BIGSERIAL PRIMARY KEY,
            entity_id TEXT NOT NULL,
            category TEXT NOT NULL,
            season TEXT NOT NULL,
            text TEXT NOT NULL,
            metadata JSONB NOT NULL,
            embedding VECTOR({dimension}) NOT NULL,
            created_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ
        )",
        table.qualified()
    )
}

fn insert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} \
            (entity_id, category, season, text, metadata, embedding, created_at, updated_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        table.qualified()
    )
}
