pub mod actors;
pub mod assembly;
pub mod config;
pub mod generation;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod originality;
pub mod pacing;
pub mod pricing;
pub mod reasoning;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod testing;
pub mod verification;

pub use actors::{
    ActionError, BidOutcome, BidStatus, DeliveryKind, HttpSiteBridge, InboundMessage,
    ItemSummary, PacedSite, SiteBridge, SiteConfig,
};
pub use assembly::{ArtifactsConfig, AssemblyError, DocumentAssembler, MarkdownAssembler};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use generation::{ContentEngine, Document, GenerationConfig, GenerationError, GenerationSpec};
pub use notify::{create_notification_system, Notification, NotificationHandle, NotificationStore};
pub use orchestrator::{
    AdvanceOutcome, Collaborators, Job, Orchestrator, OrchestratorConfig, OrchestratorError,
    OrchestratorStatus,
};
pub use originality::{OriginalityConfig, OriginalityError, OriginalityLoop};
pub use pacing::{ActionKind, PacingConfig, PacingError, PacingGovernor, PacingStatus};
pub use pricing::{PriceCalculator, PricingConfig};
pub use reasoning::{create_reasoning_client, ReasoningClient, ReasoningConfig, ReasoningError};
pub use registry::{ItemFilter, ItemStatus, Registry, RegistryError, SqliteRegistry, WorkItem};
pub use retry::{Classify, FailureClass, RetryConfig, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError};
pub use verification::{create_checker, OriginalityChecker, VerificationConfig, VerificationError};
