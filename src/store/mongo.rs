//! MongoDB Atlas backend with an Atlas Search `knnVector` index.

use anyhow::{anyhow, Context, Result};
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, SearchIndexModel};
use tracing::{info, warn};

use super::DocumentStore;
use crate::embedder::EmbeddedDocument;

/// Default database name.
pub const DEFAULT_DATABASE: &str = "OpenMuse";
/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "nba";

/// Connection target for [`MongoStore`].
#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection string.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

/// MongoDB Atlas document store.
pub struct MongoStore {
    config: MongoConfig,
    client: Option<Client>,
    collection: Option<Collection<Document>>,
}

impl MongoStore {
    /// Validates the config; connecting happens in `connect`.
    pub fn new(config: MongoConfig) -> Result<Self> {
        anyhow::ensure!(!config.uri.trim().is_empty(), "MongoDB URI is required");
        Ok(Self {
            config,
            client: None,
            collection: None,
        })
    }

    fn collection(&self) -> Result<&Collection<Document>> {
        self.collection
            .as_ref()
            .ok_or_else(|| anyhow!("not connected to MongoDB"))
    }
}

/// Atlas Search mapping for the `embedding` field.
pub fn vector_index_definition(dimension: usize) -> Document {
    doc! {
        "mappings": {
            "dynamic": true,
            "fields": {
                "embedding": {
                    "dimensions": dimension as i64,
                    "similarity": "cosine",
                    "type": "knnVector",
                }
            }
        }
    }
}

impl DocumentStore for MongoStore {
    async fn connect(&mut self) -> Result<()> {
        let options = ClientOptions::parse(&self.config.uri)
            .await
            .context("Failed to parse MongoDB connection string")?;
        let client = Client::with_options(options).context("Failed to create MongoDB client")?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        let collection = client
            .database(&self.config.database)
            .collection::<Document>(&self.config.collection);
        info!(
            database = %self.config.database,
            collection = %self.config.collection,
            "connected to MongoDB"
        );
        self.collection = Some(collection);
        self.client = Some(client);
        Ok(())
    }

    async fn prepare(&mut self, _dimension: usize) -> Result<()> {
        // Collections are created on first insert.
        self.collection().map(|_| ())
    }

    async fn list_index_names(&mut self) -> Result<Vec<String>> {
        let mut cursor = self
            .collection()?
            .list_search_indexes()
            .await
            .context("Failed to list search indexes")?;
        let mut names = Vec::new();
        while cursor
            .advance()
            .await
            .context("Failed to advance search index cursor")?
        {
            let index = cursor
                .deserialize_current()
                .context("Failed to decode search index")?;
            if let Ok(name) = index.get_str("name") {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn create_vector_index(&mut self, name: &str, dimension: usize) -> Result<()> {
        let model = SearchIndexModel::builder()
            .name(name.to_string())
            .definition(vector_index_definition(dimension))
            .build();
        self.collection()?
            .create_search_index(model)
            .await
            .with_context(|| format!("Failed to create search index '{name}'"))?;
        info!(index = name, dimension, "created vector index");
        Ok(())
    }

    async fn delete_all(&mut self) -> Result<u64> {
        let result = self
            .collection()?
            .delete_many(doc! {})
            .await
            .context("Failed to clear collection")?;
        Ok(result.deleted_count)
    }

    async fn insert_many(&mut self, documents: &[EmbeddedDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let rows = documents
            .iter()
            .map(|document| {
                mongodb::bson::to_document(document).context("Failed to encode document as BSON")
            })
            .collect::<Result<Vec<_>>>()?;
        let result = self
            .collection()?
            .insert_many(rows)
            .await
            .context("insert_many failed")?;
        Ok(result.inserted_ids.len())
    }

    async fn disconnect(&mut self) {
        self.collection = None;
        if let Some(client) = self.client.take() {
            client.shutdown().await;
            info!("disconnected from MongoDB");
        } else {
            warn!("disconnect called without an open MongoDB connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{Category, Document as Doc};
    use serde_json::json;

    #[test]
    fn index_definition_uses_cosine_knn_vector() {
        let definition = vector_index_definition(1536);
        let field = definition
            .get_document("mappings")
            .and_then(|m| m.get_document("fields"))
            .and_then(|f| f.get_document("embedding"))
            .expect("embedding mapping");
        assert_eq!(field.get_str("type").unwrap(), "knnVector");
        assert_eq!(field.get_str("similarity").unwrap(), "cosine");
        assert_eq!(field.get_i64("dimensions").unwrap(), 1536);
    }

    #[test]
    fn embedded_documents_encode_flat() {
        let embedded = EmbeddedDocument {
            document: Doc::new(
                "text".into(),
                Category::Team,
                "1610612738",
                "all",
                json!({"doc_type": "history"}),
            ),
            embedding: vec![0.5, 0.25],
        };
        let encoded = mongodb::bson::to_document(&embedded).expect("encode");
        assert_eq!(encoded.get_str("category").unwrap(), "team");
        assert_eq!(encoded.get_array("embedding").unwrap().len(), 2);
        assert!(!encoded.contains_key("document"));
    }

    #[test]
    fn store_requires_uri() {
        let config = MongoConfig {
            uri: " ".into(),
            database: DEFAULT_DATABASE.into(),
            collection: DEFAULT_COLLECTION.into(),
        };
        assert!(MongoStore::new(config).is_err());
    }
}
