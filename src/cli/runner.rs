//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::HarvestSettings;
use crate::database::DuckDbStore;
use crate::engine::{HarvestOutcome, HarvestState, Harvester};
use crate::error::{Error, Result};
use crate::http::{HttpPageFetcher, RateLimiter, RetryController};
use crate::state::{Checkpoint, CheckpointStore};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Init => self.init(),
            Commands::Run {
                collections,
                collections_file,
            } => self.harvest(collections, collections_file.as_deref()).await,
            Commands::Status { collection } => self.status(collection.as_deref()).await,
            Commands::Reset { collection } => self.reset(collection).await,
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn init(&self) -> Result<()> {
        let settings = self.settings()?;
        let path = self.db_path(&settings);
        DuckDbStore::open(&path)?;
        info!(database = %path.display(), "Storage initialized");

        self.output_message(&json!({
            "status": "ok",
            "database": path.display().to_string(),
        }));
        Ok(())
    }

    async fn harvest(&self, collections: &[String], collections_file: Option<&Path>) -> Result<()> {
        let settings = self.settings()?;
        settings.validate()?;

        let mut ids = collections.to_vec();
        if let Some(file) = collections_file {
            ids.extend(read_collections_file(file)?);
        }
        if ids.is_empty() {
            return Err(Error::config(
                "No collections given (use --collection or --collections-file)",
            ));
        }

        let store = Arc::new(DuckDbStore::open(self.db_path(&settings))?);

        let client_config = settings.http_client_config(self.cli.token.as_deref());
        if client_config.credentials.is_none() {
            warn!(
                token_env = %settings.auth.token_env,
                "No API token configured, requests are sent without credentials"
            );
        }
        let fetcher = HttpPageFetcher::new(
            client_config,
            settings.page_decoder(),
            settings.record_mapper(),
        )?;

        // One limiter for the whole upstream, shared by every collection
        let limiter = RateLimiter::new(&settings.rate_limiter_config());
        let retry = RetryController::new(Arc::new(fetcher), limiter, settings.retry_policy());
        let harvester = Harvester::new(retry, store.clone(), store)
            .with_config(settings.harvest_config());

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping at the next page boundary");
                    cancel.cancel();
                }
            })
        };

        let outcomes = harvester.harvest_all(ids, &cancel).await;
        interrupt.abort();

        let mut failed = 0;
        for outcome in &outcomes {
            if outcome.is_failure() {
                failed += 1;
            }
            self.output_message(&outcome_message(outcome));
        }

        if failed > 0 {
            return Err(Error::Other(format!(
                "{failed} of {} collections failed",
                outcomes.len()
            )));
        }
        Ok(())
    }

    async fn status(&self, collection: Option<&str>) -> Result<()> {
        let settings = self.settings()?;
        let store = DuckDbStore::open(self.db_path(&settings))?;

        let checkpoints = match collection {
            Some(id) => vec![store.load(id).await?],
            None => store.list().await?,
        };

        for checkpoint in &checkpoints {
            self.output_message(&checkpoint_message(checkpoint));
        }
        Ok(())
    }

    async fn reset(&self, collection: &str) -> Result<()> {
        let settings = self.settings()?;
        let store = DuckDbStore::open(self.db_path(&settings))?;

        let removed = store.reset(collection).await?;
        if removed {
            info!(collection_id = collection, "Checkpoint reset");
        } else {
            warn!(collection_id = collection, "No checkpoint to reset");
        }

        self.output_message(&json!({
            "collection_id": collection,
            "reset": removed,
        }));
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Load settings, or defaults when no file was given
    fn settings(&self) -> Result<HarvestSettings> {
        match &self.cli.config {
            Some(path) => HarvestSettings::load(path),
            None => Ok(HarvestSettings::default()),
        }
    }

    fn db_path(&self, settings: &HarvestSettings) -> PathBuf {
        self.cli
            .db
            .clone()
            .unwrap_or_else(|| settings.storage.path.clone())
    }

    /// Output a message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Read collection ids, one per line; blank lines and `#` comments are ignored
fn read_collections_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "Failed to read collections file '{}': {e}",
            path.display()
        ))
    })?;

    Ok(parse_collection_ids(&content))
}

fn parse_collection_ids(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

fn outcome_message(outcome: &HarvestOutcome) -> Value {
    match &outcome.result {
        Ok(report) => serde_json::to_value(report).unwrap_or_else(|_| {
            json!({ "collection_id": outcome.collection_id, "status": "unknown" })
        }),
        Err(e) => {
            let status = if e.is_payment_required() {
                "payment_required"
            } else {
                "failed"
            };
            json!({
                "collection_id": outcome.collection_id,
                "status": status,
                "error_kind": e.fetch_error().map(|f| f.kind()),
                "error": e.to_string(),
            })
        }
    }
}

fn checkpoint_message(checkpoint: &Checkpoint) -> Value {
    json!({
        "collection_id": checkpoint.collection_id,
        "state": HarvestState::from_checkpoint(checkpoint).name(),
        "cursor": checkpoint.cursor,
        "is_complete": checkpoint.is_complete,
        "last_updated_at": checkpoint.last_updated_at.map(|t| t.to_rfc3339()),
    })
}
