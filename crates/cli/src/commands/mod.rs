pub mod config_cmd;
pub mod guard;
pub mod merge;
pub mod plan;
pub mod run;
pub mod status;

use crate::inputs::CliResult;
use lorekeep_chunking::ChunkBudget;
use lorekeep_config::{AppConfig, StoreBackend};
use lorekeep_core::{ExchangeClient, FactRetriever, RunStore};
use lorekeep_pipeline::{CreatorSettings, DEFAULT_SYSTEM_INSTRUCTIONS, Orchestrator, default_pipeline};
use lorekeep_store::{FileRunStore, InMemoryRunStore, SqliteRunStore};
use std::sync::Arc;

pub fn load_config() -> CliResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub fn creator_settings(config: &AppConfig) -> CreatorSettings {
    CreatorSettings {
        budget: ChunkBudget {
            hard_limit: config.budget.hard_limit,
            decision_budget: config.budget.decision_budget,
            question_budget: config.budget.question_budget,
        },
        max_chunks: config.budget.max_chunks,
        parse_retries: config.generation.parse_retries as usize,
        system_instructions: config
            .generation
            .system_instructions
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTIONS.to_string()),
    }
}

pub async fn open_store(config: &AppConfig) -> CliResult<Arc<dyn RunStore>> {
    let path = config.storage_path();
    let store: Arc<dyn RunStore> = match config.storage.backend {
        StoreBackend::Memory => Arc::new(InMemoryRunStore::new()),
        StoreBackend::File => Arc::new(FileRunStore::new(path)),
        StoreBackend::Sqlite => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(SqliteRunStore::new(&format!("sqlite://{}", path.display())).await?)
        }
    };
    tracing::debug!(backend = store.name(), path = %config.storage_path().display(), "Run store opened");
    Ok(store)
}

pub async fn orchestrator(
    config: &AppConfig,
    retriever: Arc<dyn FactRetriever>,
    client: Arc<dyn ExchangeClient>,
) -> CliResult<Orchestrator> {
    let registry = config.registry();
    let pipeline = default_pipeline(&registry, retriever, client, creator_settings(config))?;
    let store = open_store(config).await?;
    Ok(Orchestrator::new(pipeline, store, Arc::new(registry)))
}
