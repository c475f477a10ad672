#![warn(missing_docs)]

//! Offline NBA statistics pipeline: collect raw records from the stats API,
//! render them as text documents, embed them and load a vector store.

pub mod assembler;
pub mod cache;
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod driver;
pub mod embedder;
pub mod entities;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod stats;
pub mod store;
pub mod upload;

pub use assembler::{Assembler, Category, Document};
pub use cache::FetchCache;
pub use collector::{CollectionOptions, Collector};
pub use config::{Cli, Mode, PipelineSettings};
pub use driver::{BulkDriver, BulkOutcome, CircuitBreakerConfig};
pub use embedder::{
    EmbeddedDocument, EmbeddingBatcher, EmbeddingService, EmbeddingStage, FailurePolicy,
};
pub use entities::{EntityId, EntityKind, Player, Team};
pub use error::PipelineError;
pub use pipeline::Populator;
pub use retry::RetryPolicy;
pub use stats::{StatRow, StatTables, StatsSource};
pub use store::{Destination, DocumentStore};
pub use upload::{upload_all_files, upload_documents, upload_file, UploadOptions};
