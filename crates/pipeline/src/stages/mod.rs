//! Built-in stages and the default content pipeline.

pub mod creator;
pub mod finalizer;
pub mod guard;
pub mod planner;
pub mod retriever;

pub use creator::{CREATOR, CreatorSettings, CreatorStage, DEFAULT_SYSTEM_INSTRUCTIONS};
pub use finalizer::{FINALIZER, FinalizerStage};
pub use guard::GuardStage;
pub use planner::{PLANNER, PlannerStage};
pub use retriever::{RETRIEVER, RetrieverStage, StaticFactRetriever};

use crate::pipeline::{Pipeline, PipelineError};
use crate::stage::Stage;
use lorekeep_core::{ExchangeClient, FactRetriever, Registry};
use lorekeep_guards::{BALANCE_CHECK, BoundsGuard, CitationGuard, FACT_CHECK, LimiterGuard, PHYSICS_CHECK};
use std::sync::Arc;

/// planner → retriever → creator → fact_check → balance_check →
/// physics_check → finalizer
pub fn default_pipeline(
    registry: &Registry,
    retriever: Arc<dyn FactRetriever>,
    client: Arc<dyn ExchangeClient>,
    settings: CreatorSettings,
) -> Result<Pipeline, PipelineError> {
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(PlannerStage::new()),
        Arc::new(RetrieverStage::new(retriever)),
        Arc::new(CreatorStage::new(client, settings)),
        Arc::new(GuardStage::new(Arc::new(CitationGuard::new()), &[RETRIEVER])),
        Arc::new(GuardStage::new(
            Arc::new(LimiterGuard::new(registry.limiter.clone())),
            &[FACT_CHECK],
        )),
        Arc::new(GuardStage::new(Arc::new(BoundsGuard::new(registry.bounds.clone())), &[])),
        Arc::new(FinalizerStage::new(&[FACT_CHECK, BALANCE_CHECK, PHYSICS_CHECK])),
    ];
    Pipeline::new(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lorekeep_core::ExchangeError;

    struct Silent;

    #[async_trait]
    impl ExchangeClient for Silent {
        fn name(&self) -> &str {
            "silent"
        }
        async fn exchange(&self, _: usize, _: &str) -> Result<String, ExchangeError> {
            Err(ExchangeError::Transport("offline".into()))
        }
    }

    #[test]
    fn default_pipeline_ordering() {
        let pipeline = default_pipeline(
            &Registry::default(),
            Arc::new(StaticFactRetriever::default()),
            Arc::new(Silent),
            CreatorSettings::default(),
        )
        .unwrap();
        assert_eq!(
            pipeline.names(),
            vec![PLANNER, RETRIEVER, CREATOR, FACT_CHECK, BALANCE_CHECK, PHYSICS_CHECK, FINALIZER]
        );
        let finalizer = &pipeline.stages()[6];
        assert_eq!(finalizer.dependencies().len(), 5);
        let balance = &pipeline.stages()[4];
        assert_eq!(balance.dependencies(), vec![CREATOR, FACT_CHECK]);
    }
}
