//! Stage wiring for the populate binary.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::assembler::Assembler;
use crate::cache::FetchCache;
use crate::collector::Collector;
use crate::config::{
    DestinationKind, Mode, PipelineSettings, DATABASE_URL_VAR, MONGODB_URI_VAR,
    OPENAI_API_KEY_VAR,
};
use crate::embedder::{EmbeddingStage, OpenAiEmbedder, ALL_EMBEDDED_FILE};
use crate::error::PipelineError;
use crate::stats::nba::NbaStatsClient;
use crate::store::{Destination, MongoConfig, MongoStore, PgVectorConfig, PgVectorStore};
use crate::upload::upload_file;

/// Runs pipeline stages against the configured directories and services.
pub struct Populator {
    settings: PipelineSettings,
}

impl Populator {
    /// Wraps parsed settings.
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    /// Settings the stages run with.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Dispatches to the entry point for `mode`.
    pub fn run(&self, mode: Mode) -> Result<()> {
        match mode {
            Mode::Full => self.run_full_pipeline(),
            Mode::FromProcessed => self.run_from_processed_data(),
            Mode::FromEmbeddings => self.run_from_embeddings(),
            Mode::CollectOnly => self.run_collect_only(),
            Mode::ProcessOnly => self.run_process_only(),
        }
    }

    /// Environment variables `mode` needs that are unset or blank.
    pub fn missing_credentials(&self, mode: Mode) -> Vec<&'static str> {
        if !mode.needs_credentials() {
            return Vec::new();
        }
        let credentials = &self.settings.credentials;
        let mut missing = Vec::new();
        if credentials.openai_api_key.is_none() {
            missing.push(OPENAI_API_KEY_VAR);
        }
        match self.settings.destination.kind {
            DestinationKind::Mongo if credentials.mongodb_uri.is_none() => {
                missing.push(MONGODB_URI_VAR)
            }
            DestinationKind::Pgvector if credentials.database_url.is_none() => {
                missing.push(DATABASE_URL_VAR)
            }
            _ => {}
        }
        missing
    }

    /// Fails with [`PipelineError::MissingCredentials`] when anything is missing.
    pub fn check_credentials(&self, mode: Mode) -> Result<()> {
        let missing = self.missing_credentials(mode);
        if missing.is_empty() {
            return Ok(());
        }
        Err(PipelineError::MissingCredentials(missing).into())
    }

    /// Collects raw player, team, league and game records.
    pub fn collect_data(&self) -> Result<()> {
        info!("collecting NBA data");
        let started = Instant::now();
        let source = NbaStatsClient::new(
            self.settings.stats_url.clone(),
            self.settings.reference_season.clone(),
        )?;
        let collector = Collector::new(
            source,
            FetchCache::new(self.settings.fetch_pacing),
            self.settings.retry,
            self.settings.raw_dir.clone(),
        );
        collector.run_collection(&self.settings.collection)?;
        info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            "data collection finished"
        );
        Ok(())
    }

    /// Turns raw records into text documents.
    pub fn process_data(&self) -> Result<()> {
        info!("processing NBA data");
        let started = Instant::now();
        let assembler = Assembler::new(
            self.settings.raw_dir.clone(),
            self.settings.processed_dir.clone(),
        )?;
        let documents = assembler.process_all_data(
            self.settings.collection.player_limit,
            &self.settings.collection.seasons,
        )?;
        if documents.is_empty() {
            return Err(PipelineError::EmptyStage("processing").into());
        }
        info!(
            count = documents.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "data processing finished"
        );
        Ok(())
    }

    /// Embeds the combined processed document list.
    pub fn generate_embeddings(&self) -> Result<()> {
        info!("generating embeddings");
        let started = Instant::now();
        let api_key = self
            .settings
            .credentials
            .openai_api_key
            .as_deref()
            .ok_or(PipelineError::MissingCredentials(vec![OPENAI_API_KEY_VAR]))?;
        let embedding = &self.settings.embedding;
        let service = OpenAiEmbedder::new(
            api_key,
            &embedding.base_url,
            embedding.model.clone(),
            embedding.dimensions,
            embedding.timeout,
        )?;
        let stage = EmbeddingStage::new(
            service,
            embedding.batcher.clone(),
            self.settings.processed_dir.clone(),
            self.settings.embeddings_dir.clone(),
        );
        let embedded = stage.process_combined_file()?;
        if embedded.is_empty() {
            return Err(PipelineError::EmptyStage("embedding").into());
        }
        info!(
            count = embedded.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "embedding generation finished"
        );
        Ok(())
    }

    /// Uploads the combined embedded document list; zero uploaded is a failure.
    pub fn upload_to_database(&self) -> Result<()> {
        info!("uploading to database");
        let started = Instant::now();
        let mut destination = self.destination()?;
        let path = self.settings.embeddings_dir.join(ALL_EMBEDDED_FILE);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build upload runtime")?;
        let uploaded =
            runtime.block_on(upload_file(&mut destination, &path, &self.settings.upload));
        if uploaded == 0 {
            return Err(PipelineError::EmptyStage("upload").into());
        }
        info!(
            uploaded,
            destination = destination.label(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "database upload finished"
        );
        Ok(())
    }

    fn destination(&self) -> Result<Destination> {
        let settings = &self.settings.destination;
        let credentials = &self.settings.credentials;
        match settings.kind {
            DestinationKind::Mongo => {
                let uri = credentials
                    .mongodb_uri
                    .clone()
                    .ok_or(PipelineError::MissingCredentials(vec![MONGODB_URI_VAR]))?;
                Ok(Destination::Mongo(MongoStore::new(MongoConfig {
                    uri,
                    database: settings.database.clone(),
                    collection: settings.collection.clone(),
                })?))
            }
            DestinationKind::Pgvector => {
                let database_url = credentials
                    .database_url
                    .clone()
                    .ok_or(PipelineError::MissingCredentials(vec![DATABASE_URL_VAR]))?;
                Ok(Destination::PgVector(PgVectorStore::new(PgVectorConfig {
                    database_url,
                    table: settings.table.clone(),
                })?))
            }
        }
    }

    /// Collects, processes, embeds and uploads.
    pub fn run_full_pipeline(&self) -> Result<()> {
        self.check_credentials(Mode::Full)?;
        info!("starting full NBA data pipeline");
        let started = Instant::now();
        self.collect_data()?;
        self.process_data()?;
        self.generate_embeddings()?;
        self.upload_to_database()?;
        finished(started);
        Ok(())
    }

    /// Resumes from `all_processed_data.json`.
    pub fn run_from_processed_data(&self) -> Result<()> {
        self.check_credentials(Mode::FromProcessed)?;
        info!("starting pipeline from processed data");
        let started = Instant::now();
        self.generate_embeddings()?;
        self.upload_to_database()?;
        finished(started);
        Ok(())
    }

    /// Resumes from `all_embedded_data.json`.
    pub fn run_from_embeddings(&self) -> Result<()> {
        self.check_credentials(Mode::FromEmbeddings)?;
        info!("starting pipeline from embeddings");
        let started = Instant::now();
        self.upload_to_database()?;
        finished(started);
        Ok(())
    }

    /// Collects raw records only.
    pub fn run_collect_only(&self) -> Result<()> {
        self.check_credentials(Mode::CollectOnly)?;
        let started = Instant::now();
        self.collect_data()?;
        finished(started);
        Ok(())
    }

    /// Rebuilds documents from collected records only.
    pub fn run_process_only(&self) -> Result<()> {
        self.check_credentials(Mode::ProcessOnly)?;
        let started = Instant::now();
        self.process_data()?;
        finished(started);
        Ok(())
    }
}

fn finished(started: Instant) {
    info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        "pipeline completed"
    );
}
