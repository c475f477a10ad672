//! Destination stores for embedded documents.

pub mod mongo;
pub mod pgvector;

use anyhow::Result;

use crate::embedder::EmbeddedDocument;

pub use self::mongo::{MongoConfig, MongoStore};
pub use self::pgvector::{PgVectorConfig, PgVectorStore, TableName};

/// Default name of the vector search index.
pub const DEFAULT_INDEX_NAME: &str = "vector_index";

/// Default dimension of `text-embedding-ada-002` vectors.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Connection-scoped operations the upload manager needs from a backend.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    /// Opens and verifies a connection.
    async fn connect(&mut self) -> Result<()>;

    /// Creates whatever schema the backend needs for `dimension`-sized vectors.
    async fn prepare(&mut self, dimension: usize) -> Result<()>;

    /// Names of the vector indexes that already exist.
    async fn list_index_names(&mut self) -> Result<Vec<String>>;

    /// Creates a vector index named `name` for `dimension`-sized vectors.
    async fn create_vector_index(&mut self, name: &str, dimension: usize) -> Result<()>;

    /// Removes every stored document, returning how many were deleted.
    async fn delete_all(&mut self) -> Result<u64>;

    /// Inserts one batch, returning the number persisted.
    async fn insert_many(&mut self, documents: &[EmbeddedDocument]) -> Result<usize>;

    /// Closes the connection; safe to call when not connected.
    async fn disconnect(&mut self);
}

/// Configured backend, chosen at startup.
pub enum Destination {
    /// MongoDB Atlas.
    Mongo(MongoStore),
    /// Postgres with pgvector.
    PgVector(PgVectorStore),
}

impl Destination {
    /// Short backend name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Destination::Mongo(_) => "mongodb",
            Destination::PgVector(_) => "pgvector",
        }
    }
}

impl DocumentStore for Destination {
    async fn connect(&mut self) -> Result<()> {
        match self {
            Destination::Mongo(store) => store.connect().await,
            Destination::PgVector(store) => store.connect().await,
        }
    }

    async fn prepare(&mut self, dimension: usize) -> Result<()> {
        match self {
            Destination::Mongo(store) => store.prepare(dimension).await,
            Destination::PgVector(store) => store.prepare(dimension).await,
        }
    }

    async fn list_index_names(&mut self) -> Result<Vec<String>> {
        match self {
            Destination::Mongo(store) => store.list_index_names().await,
            Destination::PgVector(store) => store.list_index_names().await,
        }
    }

    async fn create_vector_index(&mut self, name: &str, dimension: usize) -> Result<()> {
        match self {
            Destination::Mongo(store) => store.create_vector_index(name, dimension).await,
            Destination::PgVector(store) => store.create_vector_index(name, dimension).await,
        }
    }

    async fn delete_all(&mut self) -> Result<u64> {
        match self {
            Destination::Mongo(store) => store.delete_all().await,
            Destination::PgVector(store) => store.delete_all().await,
        }
    }

    async fn insert_many(&mut self, documents: &[EmbeddedDocument]) -> Result<usize> {
        match self {
            Destination::Mongo(store) => store.insert_many(documents).await,
            Destination::PgVector(store) => store.insert_many(documents).await,
        }
    }

    async fn disconnect(&mut self) {
        match self {
            Destination::Mongo(store) => store.disconnect().await,
            Destination::PgVector(store) => store.disconnect().await,
        }
    }
}
