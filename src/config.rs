//! Command-line and environment configuration for the populate binary.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::collector::{CollectionOptions, DEFAULT_RECENT_DAYS};
use crate::driver::{BulkDriver, CircuitBreakerConfig};
use crate::embedder::{openai, EmbeddingBatcher, FailurePolicy};
use crate::retry::RetryPolicy;
use crate::stats::nba;
use crate::store::{mongo, TableName, DEFAULT_INDEX_NAME};
use crate::upload::UploadOptions;

/// Embedding service key variable.
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
/// MongoDB connection string variable.
pub const MONGODB_URI_VAR: &str = "MONGODB_URI";
/// Postgres connection string variable.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Where a run starts and which stages it covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Mode {
    /// Collect, process, embed and upload.
    Full,
    /// Embed and upload existing processed documents.
    FromProcessed,
    /// Upload existing embeddings.
    FromEmbeddings,
    /// Collect raw data only.
    CollectOnly,
    /// Turn already collected raw data into documents only.
    ProcessOnly,
}

impl Mode {
    /// Whether the mode reaches the embedding or upload stages.
    pub fn needs_credentials(self) -> bool {
        matches!(self, Mode::Full | Mode::FromProcessed | Mode::FromEmbeddings)
    }
}

/// Backend the upload stage writes to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DestinationKind {
    /// MongoDB Atlas with an Atlas Search vector index.
    Mongo,
    /// Postgres with the pgvector extension.
    Pgvector,
}

/// Command-line form of [`FailurePolicy`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicyArg {
    /// Leave failed documents out.
    Drop,
    /// Stop the stage.
    Abort,
}

impl From<FailurePolicyArg> for FailurePolicy {
    fn from(value: FailurePolicyArg) -> Self {
        match value {
            FailurePolicyArg::Drop => FailurePolicy::Drop,
            FailurePolicyArg::Abort => FailurePolicy::Abort,
        }
    }
}

/// Collect NBA statistics, embed them and load a vector store
#[derive(Parser, Debug, Clone)]
#[command(name = "statline-populate")]
pub struct Cli {
    /// Pipeline mode
    #[arg(long, env = "STATLINE_MODE", value_enum, default_value_t = Mode::Full)]
    pub mode: Mode,

    /// Limit number of players to collect and process
    #[arg(long, env = "STATLINE_PLAYER_LIMIT")]
    pub player_limit: Option<usize>,

    /// Seasons to collect league data for, comma separated
    #[arg(
        long,
        env = "STATLINE_SEASONS",
        value_delimiter = ',',
        default_value = "2023-24"
    )]
    pub seasons: Vec<String>,

    /// Keep existing documents in the destination
    #[arg(long, env = "STATLINE_NO_CLEAR", default_value_t = false)]
    pub no_clear: bool,

    /// Directory for raw collected records
    #[arg(long, env = "STATLINE_RAW_DIR", default_value = "nba_data")]
    pub raw_dir: PathBuf,

    /// Directory for processed documents
    #[arg(long, env = "STATLINE_PROCESSED_DIR", default_value = "nba_processed_data")]
    pub processed_dir: PathBuf,

    /// Directory for embedded documents
    #[arg(long, env = "STATLINE_EMBEDDINGS_DIR", default_value = "nba_embeddings")]
    pub embeddings_dir: PathBuf,

    /// Stats API root
    #[arg(long, env = "STATLINE_STATS_URL", default_value = nba::DEFAULT_BASE_URL)]
    pub stats_url: String,

    /// Season used to list all players
    #[arg(long, env = "STATLINE_REFERENCE_SEASON", default_value = "2023-24")]
    pub reference_season: String,

    /// Worker threads for per-entity collection
    #[arg(long, env = "STATLINE_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Lower bound of per-entity jitter, milliseconds
    #[arg(long, env = "STATLINE_JITTER_MIN_MS", default_value_t = 1000)]
    pub jitter_min_ms: u64,

    /// Upper bound of per-entity jitter, milliseconds
    #[arg(long, env = "STATLINE_JITTER_MAX_MS", default_value_t = 2500)]
    pub jitter_max_ms: u64,

    /// Milliseconds slept before every uncached stats fetch
    #[arg(long, env = "STATLINE_FETCH_PACING_MS", default_value_t = 600)]
    pub fetch_pacing_ms: u64,

    /// Attempts per stats call
    #[arg(long, env = "STATLINE_RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: usize,

    /// Initial backoff between stats attempts, milliseconds
    #[arg(long, env = "STATLINE_RETRY_DELAY_MS", default_value_t = 2000)]
    pub retry_delay_ms: u64,

    /// Per-attempt timeout for stats calls, seconds
    #[arg(long, env = "STATLINE_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Results per breaker window during player collection
    #[arg(long, env = "STATLINE_PLAYER_BREAKER_WINDOW", default_value_t = 30)]
    pub player_breaker_window: usize,

    /// Failures within a player window that stop collection
    #[arg(long, env = "STATLINE_PLAYER_BREAKER_THRESHOLD", default_value_t = 10)]
    pub player_breaker_threshold: usize,

    /// Results per breaker window during team collection
    #[arg(long, env = "STATLINE_TEAM_BREAKER_WINDOW", default_value_t = 10)]
    pub team_breaker_window: usize,

    /// Failures within a team window that stop collection
    #[arg(long, env = "STATLINE_TEAM_BREAKER_THRESHOLD", default_value_t = 5)]
    pub team_breaker_threshold: usize,

    /// Days of recent games to summarize
    #[arg(long, env = "STATLINE_RECENT_DAYS", default_value_t = DEFAULT_RECENT_DAYS)]
    pub recent_days: i64,

    /// OpenAI-compatible API root
    #[arg(long, env = "STATLINE_OPENAI_BASE", default_value = openai::DEFAULT_BASE_URL)]
    pub openai_base: String,

    /// Embedding model name
    #[arg(long, env = "STATLINE_EMBED_MODEL", default_value = openai::DEFAULT_MODEL)]
    pub embed_model: String,

    /// Optional embedding dimensions override
    #[arg(long, env = "STATLINE_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Texts per embedding request
    #[arg(long, env = "STATLINE_EMBED_BATCH", default_value_t = 10)]
    pub embed_batch_size: usize,

    /// Attempts per embedding batch
    #[arg(long, env = "STATLINE_EMBED_RETRIES", default_value_t = 3)]
    pub embed_retry_limit: usize,

    /// Seconds between embedding attempts
    #[arg(long, env = "STATLINE_EMBED_RETRY_DELAY_SECS", default_value_t = 5)]
    pub embed_retry_delay_secs: u64,

    /// Milliseconds slept after each successful embedding batch
    #[arg(long, env = "STATLINE_EMBED_PACING_MS", default_value_t = 500)]
    pub embed_pacing_ms: u64,

    /// Embedding request timeout, seconds
    #[arg(long, env = "STATLINE_EMBED_TIMEOUT_SECS", default_value_t = 60)]
    pub embed_timeout_secs: u64,

    /// What to do with a batch that exhausts its retries
    #[arg(long, env = "STATLINE_EMBED_FAILURE", value_enum, default_value_t = FailurePolicyArg::Drop)]
    pub embed_failure: FailurePolicyArg,

    /// Destination backend
    #[arg(long, env = "STATLINE_DESTINATION", value_enum, default_value_t = DestinationKind::Mongo)]
    pub destination: DestinationKind,

    /// MongoDB database name
    #[arg(long, env = "STATLINE_DB_NAME", default_value = mongo::DEFAULT_DATABASE)]
    pub db_name: String,

    /// MongoDB collection name
    #[arg(long, env = "STATLINE_COLLECTION", default_value = mongo::DEFAULT_COLLECTION)]
    pub collection_name: String,

    /// Postgres schema for the pgvector table
    #[arg(long, env = "STATLINE_PG_SCHEMA", default_value = "public")]
    pub pg_schema: String,

    /// Postgres table for the pgvector destination
    #[arg(long, env = "STATLINE_PG_TABLE", default_value = "nba")]
    pub pg_table: String,

    /// Vector index name
    #[arg(long, env = "STATLINE_INDEX_NAME", default_value = DEFAULT_INDEX_NAME)]
    pub index_name: String,

    /// Documents per insert batch
    #[arg(long, env = "STATLINE_UPLOAD_BATCH", default_value_t = 100)]
    pub upload_batch_size: usize,

    /// Embedding service API key
    #[arg(long, env = OPENAI_API_KEY_VAR, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// MongoDB connection string
    #[arg(long, env = MONGODB_URI_VAR, hide_env_values = true)]
    pub mongodb_uri: Option<String>,

    /// Postgres connection string
    #[arg(long, env = DATABASE_URL_VAR, hide_env_values = true)]
    pub database_url: Option<String>,
}

/// Credentials as supplied; blank values count as missing.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Embedding service key.
    pub openai_api_key: Option<String>,
    /// MongoDB connection string.
    pub mongodb_uri: Option<String>,
    /// Postgres connection string.
    pub database_url: Option<String>,
}

/// Embedding client and batcher settings.
#[derive(Clone, Debug)]
pub struct EmbeddingSettings {
    /// OpenAI-compatible API root.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Dimensions override sent to the API.
    pub dimensions: Option<usize>,
    /// Request timeout.
    pub timeout: Duration,
    /// Batching and retry behavior.
    pub batcher: EmbeddingBatcher,
}

/// Which backend to write to and where.
#[derive(Clone, Debug)]
pub struct DestinationSettings {
    /// Backend.
    pub kind: DestinationKind,
    /// MongoDB database.
    pub database: String,
    /// MongoDB collection.
    pub collection: String,
    /// Postgres table.
    pub table: TableName,
}

/// Everything a [`crate::pipeline::Populator`] needs.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Raw record directory.
    pub raw_dir: PathBuf,
    /// Processed document directory.
    pub processed_dir: PathBuf,
    /// Embedded document directory.
    pub embeddings_dir: PathBuf,
    /// Stats API root.
    pub stats_url: String,
    /// Season used to list every player.
    pub reference_season: String,
    /// Delay before each uncached stats fetch.
    pub fetch_pacing: Duration,
    /// Retry policy for stats calls.
    pub retry: RetryPolicy,
    /// Collection stage options.
    pub collection: CollectionOptions,
    /// Embedding stage settings.
    pub embedding: EmbeddingSettings,
    /// Upload destination.
    pub destination: DestinationSettings,
    /// Upload stage options.
    pub upload: UploadOptions,
    /// Credentials read from the environment.
    pub credentials: Credentials,
}

impl Cli {
    /// Converts the parsed CLI into `PipelineSettings`.
    pub fn build_settings(&self) -> Result<PipelineSettings> {
        let breaker_players =
            CircuitBreakerConfig::new(self.player_breaker_window, self.player_breaker_threshold);
        let breaker_teams =
            CircuitBreakerConfig::new(self.team_breaker_window, self.team_breaker_threshold);
        let driver = BulkDriver::new(
            self.workers,
            Duration::from_millis(self.jitter_min_ms)..=Duration::from_millis(self.jitter_max_ms),
            breaker_players,
        );

        Ok(PipelineSettings {
            raw_dir: self.raw_dir.clone(),
            processed_dir: self.processed_dir.clone(),
            embeddings_dir: self.embeddings_dir.clone(),
            stats_url: self.stats_url.clone(),
            reference_season: self.reference_season.clone(),
            fetch_pacing: Duration::from_millis(self.fetch_pacing_ms),
            retry: RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_delay_ms),
                Duration::from_secs(self.request_timeout_secs),
            ),
            collection: CollectionOptions {
                player_limit: self.player_limit,
                seasons: self.seasons_vec(),
                recent_days: self.recent_days,
                driver,
                player_breaker: breaker_players,
                team_breaker: breaker_teams,
                ..CollectionOptions::default()
            },
            embedding: EmbeddingSettings {
                base_url: self.openai_base.clone(),
                model: self.embed_model.clone(),
                dimensions: self.embed_dimensions,
                timeout: Duration::from_secs(self.embed_timeout_secs),
                batcher: EmbeddingBatcher {
                    batch_size: self.embed_batch_size.max(1),
                    retry_limit: self.embed_retry_limit.max(1),
                    retry_delay: Duration::from_secs(self.embed_retry_delay_secs),
                    pacing: Duration::from_millis(self.embed_pacing_ms),
                    expected_dimension: self.embed_dimensions,
                    failure_policy: self.embed_failure.into(),
                },
            },
            destination: DestinationSettings {
                kind: self.destination,
                database: self.db_name.clone(),
                collection: self.collection_name.clone(),
                table: TableName::new(self.pg_schema.clone(), self.pg_table.clone())?,
            },
            upload: UploadOptions {
                batch_size: self.upload_batch_size.max(1),
                clear_first: !self.no_clear,
                index_name: self.index_name.clone(),
                dimension: self.embed_dimensions,
            },
            credentials: Credentials {
                openai_api_key: non_blank(&self.openai_api_key),
                mongodb_uri: non_blank(&self.mongodb_uri),
                database_url: non_blank(&self.database_url),
            },
        })
    }

    fn seasons_vec(&self) -> Vec<String> {
        self.seasons
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::parse_from(["statline-populate"]);
        let settings = cli.build_settings().expect("settings");
        assert_eq!(cli.mode, Mode::Full);
        assert_eq!(settings.raw_dir, PathBuf::from("nba_data"));
        assert_eq!(settings.collection.seasons, vec!["2023-24".to_string()]);
        assert_eq!(settings.collection.player_breaker, CircuitBreakerConfig::PLAYERS);
        assert_eq!(settings.collection.team_breaker, CircuitBreakerConfig::TEAMS);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.embedding.batcher.batch_size, 10);
        assert_eq!(settings.upload.batch_size, 100);
        assert!(settings.upload.clear_first);
        assert_eq!(settings.upload.index_name, "vector_index");
    }

    #[test]
    fn parses_modes_and_lists() {
        let cli = Cli::parse_from([
            "statline-populate",
            "--mode",
            "from_embeddings",
            "--seasons",
            "2022-23, 2023-24",
            "--no-clear",
            "--destination",
            "pgvector",
            "--openai-api-key",
            "   ",
        ]);
        let settings = cli.build_settings().expect("settings");
        assert_eq!(cli.mode, Mode::FromEmbeddings);
        assert_eq!(
            settings.collection.seasons,
            vec!["2022-23".to_string(), "2023-24".to_string()]
        );
        assert!(!settings.upload.clear_first);
        assert_eq!(settings.destination.kind, DestinationKind::Pgvector);
        assert!(settings.credentials.openai_api_key.is_none());
    }

    #[test]
    fn stage_only_modes_skip_credentials() {
        assert!(Mode::Full.needs_credentials());
        assert!(!Mode::CollectOnly.needs_credentials());
        assert!(!Mode::ProcessOnly.needs_credentials());
    }
}
