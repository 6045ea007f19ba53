//! Shared wiring for lifecycle integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use scrivener_core::originality::ExhaustedPolicy;
use scrivener_core::registry::{Budget, NewWorkItem};
use scrivener_core::testing::{fixtures, MockChecker, MockReasoningClient, MockSite};
use scrivener_core::{
    ActionKind, Collaborators, ContentEngine, GenerationConfig, MarkdownAssembler, Orchestrator,
    OrchestratorConfig, OriginalityConfig, OriginalityLoop, PacedSite, PacingConfig,
    PacingGovernor, PriceCalculator, PricingConfig, Registry, RetryPolicy, SqliteRegistry,
    WorkItem,
};

pub const BUDGET_MIN: u32 = 2700;
pub const BUDGET_MAX: u32 = 3000;

/// Knobs for [`TestHarness::build`].
pub struct HarnessOptions {
    pub score: u8,
    pub bid_limit: Option<u32>,
    pub on_exhausted: ExhaustedPolicy,
    pub orchestrator: OrchestratorConfig,
    /// Applied around the orchestrator's site calls.
    pub retry: RetryPolicy,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            score: 75,
            bid_limit: None,
            on_exhausted: ExhaustedPolicy::DeliverBestEffort,
            orchestrator: OrchestratorConfig::default(),
            retry: RetryPolicy::none(),
        }
    }
}

/// An orchestrator over an on-disk registry and mock collaborators.
pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<SqliteRegistry>,
    pub governor: Arc<PacingGovernor>,
    pub site: Arc<MockSite>,
    pub checker: Arc<MockChecker>,
    pub reasoning: Arc<MockReasoningClient>,
    pub pricing: PricingConfig,
    pub temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(HarnessOptions::default())
    }

    pub fn build(options: HarnessOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = Arc::new(
            SqliteRegistry::new(&temp_dir.path().join("test.db"))
                .expect("Failed to create registry"),
        );
        let site = Arc::new(MockSite::new());
        let checker = Arc::new(MockChecker::new());
        let reasoning = fixtures::scripted_reasoning(options.score);

        let mut daily_limits = BTreeMap::new();
        if let Some(limit) = options.bid_limit {
            daily_limits.insert(ActionKind::Bid, limit);
        }
        let governor = Arc::new(
            PacingGovernor::new(PacingConfig {
                min_delay_ms: 0,
                max_delay_ms: 0,
                ban_cooldown_secs: 60,
                daily_limits,
            })
            .with_count_store(registry.clone()),
        );

        let originality = OriginalityLoop::new(
            checker.clone(),
            reasoning.clone(),
            OriginalityConfig {
                sampling_enabled: false,
                on_exhausted: options.on_exhausted,
                ..Default::default()
            },
        )
        .with_retry(RetryPolicy::none())
        .with_polling(Duration::ZERO, Duration::from_secs(5));

        let pricing = PricingConfig::default();
        let orchestrator = Orchestrator::new(
            options.orchestrator,
            Collaborators {
                registry: registry.clone(),
                site: PacedSite::new(Arc::clone(&governor), site.clone()),
                reasoning: reasoning.clone(),
                engine: ContentEngine::new(reasoning.clone(), GenerationConfig::default())
                    .with_retry(RetryPolicy::none()),
                originality,
                pricing: PriceCalculator::new(pricing.clone()),
                assembler: Arc::new(MarkdownAssembler::new(temp_dir.path().join("artifacts"))),
                notifier: None,
            },
        )
        .with_retry(options.retry);

        Self {
            orchestrator: Arc::new(orchestrator),
            registry,
            governor,
            site,
            checker,
            reasoning,
            pricing,
            temp_dir,
        }
    }

    /// List an item on the mock site and register it as discovered.
    pub fn discover(&self, external_ref: &str, work_type: &str) -> WorkItem {
        self.site.add_item(
            fixtures::summary(external_ref),
            fixtures::item_detail(work_type, Budget::range(BUDGET_MIN, BUDGET_MAX)),
        );
        self.registry
            .create_if_absent(NewWorkItem {
                external_ref: external_ref.to_string(),
                title: format!("Item {}", external_ref),
                listed_budget: Budget::range(BUDGET_MIN, BUDGET_MAX),
            })
            .expect("Failed to create item")
            .expect("Item already exists")
    }

    pub fn item(&self, id: &str) -> WorkItem {
        self.registry
            .get(id)
            .expect("Registry read failed")
            .expect("Item missing")
    }

    pub fn action_kinds(&self, id: &str) -> Vec<String> {
        self.registry
            .actions(id)
            .expect("Registry read failed")
            .into_iter()
            .map(|a| a.kind)
            .collect()
    }
}
