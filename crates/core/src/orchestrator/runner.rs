//! Work item orchestrator implementation.
//!
//! Jobs arrive on a bounded queue and are drained by a fixed pool of workers.
//! Each job performs at most one stage of one item; a per-item in-flight
//! guard keeps two workers from touching the same item.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::actors::{ConversationResponder, PacedSite};
use crate::assembly::DocumentAssembler;
use crate::generation::ContentEngine;
use crate::metrics;
use crate::notify::{Notification, NotificationHandle};
use crate::originality::OriginalityLoop;
use crate::pacing::next_quota_reset;
use crate::pricing::PriceCalculator;
use crate::reasoning::{ReasoningClient, UsageTally};
use crate::registry::{
    action_kinds, ActionOutcome, ItemFilter, ItemStatus, NewActionLogEntry, Registry,
    RegistryError, WorkItem,
};
use crate::retry::{Classify, FailureClass, RetryPolicy};

use super::config::OrchestratorConfig;
use super::types::{AdvanceOutcome, OrchestratorError, OrchestratorStatus};

/// Everything the orchestrator calls out to.
pub struct Collaborators {
    pub registry: Arc<dyn Registry>,
    pub site: PacedSite,
    pub reasoning: Arc<dyn ReasoningClient>,
    pub engine: ContentEngine,
    pub originality: OriginalityLoop,
    pub pricing: PriceCalculator,
    pub assembler: Arc<dyn DocumentAssembler>,
    pub notifier: Option<NotificationHandle>,
}

/// Unit of work for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Run the item's next stage.
    Advance(String),
    /// Handle new customer messages without changing stage.
    Conversation(String),
}

impl Job {
    pub fn item_id(&self) -> &str {
        match self {
            Job::Advance(id) | Job::Conversation(id) => id,
        }
    }
}

/// Result of one stage handler.
pub(super) enum Step {
    Advance(ItemStatus),
    Stay(String),
    Reject(String),
}

/// Per-stage scratch state: usage and the action log entries to commit.
pub(super) struct StageContext {
    pub tally: UsageTally,
    pub actions: Vec<NewActionLogEntry>,
    /// Held until the stage result is committed.
    pub reservation: Option<Reservation>,
}

impl StageContext {
    fn new(item_id: &str) -> Self {
        Self {
            tally: UsageTally::for_item(item_id),
            actions: Vec::new(),
            reservation: None,
        }
    }

    pub fn log(
        &mut self,
        item: &WorkItem,
        kind: &str,
        outcome: ActionOutcome,
        detail: impl Into<String>,
    ) {
        self.actions
            .push(NewActionLogEntry::new(&item.id, kind, outcome).with_detail(detail));
    }
}

/// Releases the item's in-flight slot when dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        if !set.lock().unwrap().insert(id.to_string()) {
            return None;
        }
        metrics::ITEMS_IN_FLIGHT.inc();
        Some(Self {
            set: Arc::clone(set),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.id);
        metrics::ITEMS_IN_FLIGHT.dec();
    }
}

/// Slots promised to items whose stage result is not committed yet.
///
/// The committed count is read under the same lock that records the promise,
/// so two workers never see the same free slot.
#[derive(Default)]
pub(super) struct SlotReservations {
    pending: Arc<Mutex<HashSet<String>>>,
}

pub(super) enum SlotGrant {
    Granted(Reservation),
    Full(i64),
}

impl SlotReservations {
    pub fn try_reserve(
        &self,
        id: &str,
        limit: usize,
        committed: impl FnOnce() -> Result<i64, OrchestratorError>,
    ) -> Result<SlotGrant, OrchestratorError> {
        let mut pending = self.pending.lock().unwrap();
        let in_use = committed()? + pending.len() as i64;
        if in_use >= limit as i64 {
            return Ok(SlotGrant::Full(in_use));
        }
        pending.insert(id.to_string());
        Ok(SlotGrant::Granted(Reservation {
            pending: Arc::clone(&self.pending),
            id: id.to_string(),
        }))
    }
}

/// Releases a pending slot when dropped.
pub(super) struct Reservation {
    pending: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pending.lock().unwrap().remove(&self.id);
    }
}

/// State shared by the handle and every worker.
pub(super) struct Shared {
    pub config: OrchestratorConfig,
    pub registry: Arc<dyn Registry>,
    pub site: PacedSite,
    pub reasoning: Arc<dyn ReasoningClient>,
    pub engine: ContentEngine,
    pub originality: OriginalityLoop,
    pub responder: ConversationResponder,
    pub pricing: PriceCalculator,
    pub assembler: Arc<dyn DocumentAssembler>,
    pub notifier: Option<NotificationHandle>,
    pub retry: RetryPolicy,
    pub generation_slots: Semaphore,
    pub item_slots: SlotReservations,
    pub generation_admissions: SlotReservations,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// The work item orchestrator - drives items through their lifecycle.
pub struct Orchestrator {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let retry = RetryPolicy::from_config(&config.retry);
        let generation_slots = Semaphore::new(config.max_concurrent_generations.max(1));

        let shared = Shared {
            responder: ConversationResponder::new(Arc::clone(&collaborators.reasoning)),
            registry: collaborators.registry,
            site: collaborators.site,
            reasoning: collaborators.reasoning,
            engine: collaborators.engine,
            originality: collaborators.originality,
            pricing: collaborators.pricing,
            assembler: collaborators.assembler,
            notifier: collaborators.notifier,
            retry,
            generation_slots,
            item_slots: SlotReservations::default(),
            generation_admissions: SlotReservations::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            config,
        };

        Self {
            shared: Arc::new(shared),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
        }
    }

    /// Replace the retry policy derived from configuration. Must be called
    /// before the orchestrator is shared.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.retry = retry;
        }
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.shared.registry
    }

    /// Start the worker pool.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        let workers = self.shared.config.max_concurrent_items.max(1);
        info!(workers, "Starting orchestrator");

        for worker in 0..workers {
            self.spawn_worker(worker);
        }
    }

    /// Stop the worker pool. In-flight stages finish; queued jobs stay queued.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }
        info!("Stopping orchestrator");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Queue a job without waiting. Returns false if the queue is full; the
    /// periodic sweep picks the item up later.
    pub fn enqueue(&self, job: Job) -> bool {
        match self.queue_tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                debug!(item_id = job.item_id(), "Job queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Perform exactly one stage of the item's lifecycle and persist it.
    ///
    /// Returns [`AdvanceOutcome::InFlight`] without doing anything if another
    /// caller is already working on the item.
    pub async fn advance(&self, id: &str) -> Result<AdvanceOutcome, OrchestratorError> {
        self.shared.advance(id).await
    }

    /// Advance repeatedly until the item stops moving or `max_steps` stages ran.
    pub async fn advance_until_blocked(
        &self,
        id: &str,
        max_steps: usize,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let mut last = AdvanceOutcome::InFlight;
        for _ in 0..max_steps {
            last = self.advance(id).await?;
            if !last.moved() {
                break;
            }
        }
        Ok(last)
    }

    /// Fetch and answer new customer messages for an item without moving it.
    pub async fn converse(&self, id: &str) -> Result<usize, OrchestratorError> {
        self.shared.converse_job(id).await
    }

    /// Flag an item for cancellation. Takes effect at the next safe point.
    pub fn request_cancel(&self, id: &str) -> Result<WorkItem, OrchestratorError> {
        let item = self.shared.registry.request_cancel(id)?;
        info!(item_id = %id, status = %item.status, "Cancellation requested");
        self.enqueue(Job::Advance(id.to_string()));
        Ok(item)
    }

    pub fn status(&self) -> OrchestratorStatus {
        let counts = self.shared.registry.count_by_status().unwrap_or_default();
        let active_items = counts
            .iter()
            .filter(|(status, _)| status.is_active())
            .map(|(_, count)| count)
            .sum();

        OrchestratorStatus {
            running: self.is_running(),
            capacity: self.shared.config.max_concurrent_items,
            active_items,
            in_flight: self.shared.in_flight.lock().unwrap().len(),
            queued: self.queue_tx.max_capacity() - self.queue_tx.capacity(),
            counts: counts
                .into_iter()
                .map(|(status, count)| (status.as_str().to_string(), count))
                .collect(),
        }
    }

    fn spawn_worker(&self, worker: usize) {
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let queue_rx = Arc::clone(&self.queue_rx);
        let queue_tx = self.queue_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(worker, "Worker started");
            loop {
                let job = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    job = async { queue_rx.lock().await.recv().await } => job,
                };
                let Some(job) = job else { break };
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                match job {
                    Job::Advance(id) => match shared.advance(&id).await {
                        Ok(AdvanceOutcome::Advanced { to, .. }) if !to.is_terminal() => {
                            // Keep going while the item makes progress.
                            let _ = queue_tx.try_send(Job::Advance(id));
                        }
                        Ok(_) => {}
                        Err(e) => warn!(item_id = %id, "Advance failed: {}", e),
                    },
                    Job::Conversation(id) => {
                        if let Err(e) = shared.converse_job(&id).await {
                            warn!(item_id = %id, "Conversation pass failed: {}", e);
                        }
                    }
                }
            }
            debug!(worker, "Worker stopped");
        });
    }
}

/// The item to commit when a stage is deferred. The stage is redone from
/// scratch later; only the pause and the customer's approval carry over.
fn roll_back(loaded: WorkItem, attempted: &WorkItem) -> WorkItem {
    WorkItem {
        parked_until: attempted.parked_until,
        approval_received: attempted.approval_received,
        ..loaded
    }
}

impl Shared {
    pub(super) async fn advance(&self, id: &str) -> Result<AdvanceOutcome, OrchestratorError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            debug!(item_id = %id, "Item already in flight");
            return Ok(AdvanceOutcome::InFlight);
        };

        let item = self
            .registry
            .get(id)?
            .ok_or_else(|| OrchestratorError::ItemNotFound(id.to_string()))?;

        if item.status.is_terminal() {
            return Ok(AdvanceOutcome::Finished {
                status: item.status,
            });
        }
        if item.cancel_requested {
            return self.cancel(item);
        }
        if item.is_parked(Utc::now()) {
            return Ok(AdvanceOutcome::Waiting {
                status: item.status,
                reason: "parked".to_string(),
            });
        }

        let expected = item.status;
        let loaded = item.clone();
        let mut working = item;
        let mut ctx = StageContext::new(id);

        let result = self.run_stage(&mut working, &mut ctx).await;
        self.persist_usage(&mut ctx.tally);

        let reason = match result {
            Ok(Step::Advance(next)) => {
                working.parked_until = None;
                if !working.transition(next) {
                    return Err(RegistryError::InvalidTransition {
                        id: working.id,
                        from: expected,
                        to: next,
                    }
                    .into());
                }
                String::new()
            }
            Ok(Step::Stay(reason)) => reason,
            Ok(Step::Reject(reason)) => {
                self.reject(&mut working, &mut ctx, expected, &reason);
                reason
            }
            Err(e) => {
                let deferred = e.is_quota() || e.failure_class() == FailureClass::BanDetected;
                let reason = self.fail(&mut working, &mut ctx, expected, e);
                if deferred {
                    working = roll_back(loaded, &working);
                }
                reason
            }
        };

        let stored = match self.registry.commit_stage(&working, expected, &ctx.actions) {
            Ok(stored) => stored,
            Err(RegistryError::Conflict { actual, .. }) => {
                warn!(item_id = %id, expected = %expected, actual = %actual, "Stage result discarded, item changed");
                return Ok(AdvanceOutcome::Waiting {
                    status: actual,
                    reason: "conflict".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        // The committed status now accounts for any reserved slot.
        drop(ctx.reservation.take());

        if stored.status == expected {
            debug!(item_id = %id, status = %expected, reason = %reason, "Item waiting");
            if stored.cancel_requested {
                return self.cancel(stored);
            }
            return Ok(AdvanceOutcome::Waiting {
                status: expected,
                reason,
            });
        }

        self.announce(&stored, expected);

        if stored.cancel_requested && !stored.status.is_terminal() {
            return self.cancel(stored).map(|outcome| match outcome {
                AdvanceOutcome::Advanced { to, .. } => AdvanceOutcome::Advanced { from: expected, to },
                other => other,
            });
        }

        Ok(AdvanceOutcome::Advanced {
            from: expected,
            to: stored.status,
        })
    }

    async fn run_stage(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
    ) -> Result<Step, OrchestratorError> {
        match item.status {
            ItemStatus::Discovered => self.score(item, ctx).await,
            ItemStatus::Scored => self.bid(item, ctx).await,
            ItemStatus::BidPlaced => self.poll_bid(item, ctx).await,
            ItemStatus::Accepted => self.admit_generation(item, ctx),
            ItemStatus::Generating => self.generate(item, ctx).await,
            ItemStatus::CheckingOriginality => self.check_originality(item, ctx).await,
            ItemStatus::Rewriting => self.rewrite(item, ctx).await,
            ItemStatus::DraftDelivered => self.announce_draft(item, ctx).await,
            ItemStatus::AwaitingApproval => self.await_approval(item, ctx).await,
            ItemStatus::FinalDelivered => {
                ctx.log(item, action_kinds::COMPLETE, ActionOutcome::Succeeded, "completed");
                Ok(Step::Advance(ItemStatus::Completed))
            }
            ItemStatus::Completed
            | ItemStatus::Rejected
            | ItemStatus::Error
            | ItemStatus::Cancelled => Ok(Step::Stay("terminal".to_string())),
        }
    }

    fn reject(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
        stage: ItemStatus,
        reason: &str,
    ) {
        info!(item_id = %item.id, stage = %stage, reason, "Item rejected");
        item.last_failure = Some(reason.to_string());
        item.transition(ItemStatus::Rejected);
        ctx.log(item, action_kinds::ITEM_REJECTED, ActionOutcome::Rejected, reason);
        self.notify(Notification::ItemFailed {
            item_id: item.id.clone(),
            stage: stage.as_str().to_string(),
            outcome: "rejected".to_string(),
            reason: reason.to_string(),
        });
    }

    /// Decide what a stage failure does to the item. Returns the wait reason.
    fn fail(
        &self,
        item: &mut WorkItem,
        ctx: &mut StageContext,
        stage: ItemStatus,
        e: OrchestratorError,
    ) -> String {
        let class = e.failure_class();
        metrics::STAGE_FAILURES
            .with_label_values(&[stage.as_str(), class.as_str()])
            .inc();
        let message = e.to_string();

        if e.is_quota() {
            let until = next_quota_reset(Utc::now());
            info!(item_id = %item.id, stage = %stage, until = %until, "Daily quota exhausted, parking item");
            item.parked_until = Some(until);
            ctx.log(item, action_kinds::PARK, ActionOutcome::Deferred, &message);
            return message;
        }

        if class == FailureClass::BanDetected {
            warn!(item_id = %item.id, stage = %stage, "Ban signal, item paused: {}", message);
            ctx.log(item, action_kinds::BAN_PAUSE, ActionOutcome::Deferred, &message);
            return message;
        }

        let attempts = item.bump_attempts(stage);
        error!(
            item_id = %item.id,
            stage = %stage,
            class = class.as_str(),
            attempts,
            "Stage failed: {}",
            message
        );
        item.last_failure = Some(format!("{}: {}", stage, message));
        item.transition(ItemStatus::Error);
        ctx.log(item, action_kinds::ITEM_FAILED, ActionOutcome::Failed, &message);
        self.notify(Notification::ItemFailed {
            item_id: item.id.clone(),
            stage: stage.as_str().to_string(),
            outcome: "error".to_string(),
            reason: message.clone(),
        });
        message
    }

    fn cancel(&self, item: WorkItem) -> Result<AdvanceOutcome, OrchestratorError> {
        let from = item.status;
        let mut working = item;
        if !working.transition(ItemStatus::Cancelled) {
            return Ok(AdvanceOutcome::Finished { status: from });
        }
        let entry = NewActionLogEntry::new(&working.id, action_kinds::CANCEL, ActionOutcome::Succeeded)
            .with_detail(format!("cancelled in {}", from));
        let stored = self.registry.commit_stage(&working, from, &[entry])?;
        info!(item_id = %stored.id, from = %from, "Item cancelled");
        self.announce(&stored, from);
        Ok(AdvanceOutcome::Advanced {
            from,
            to: ItemStatus::Cancelled,
        })
    }

    fn announce(&self, item: &WorkItem, from: ItemStatus) {
        metrics::STAGE_TRANSITIONS
            .with_label_values(&[item.status.as_str()])
            .inc();
        info!(item_id = %item.id, from = %from, to = %item.status, "Item advanced");
        self.notify(Notification::ItemStateChanged {
            item_id: item.id.clone(),
            from_status: from.as_str().to_string(),
            to_status: item.status.as_str().to_string(),
        });
    }

    pub(super) fn notify(&self, notification: Notification) {
        if let Some(ref notifier) = self.notifier {
            notifier.try_emit(notification);
        }
    }

    /// Active items occupying pool slots.
    pub(super) fn active_items(&self) -> Result<i64, OrchestratorError> {
        let filter = ItemFilter::new()
            .with_statuses(ItemStatus::ALL.into_iter().filter(|s| s.is_active()));
        Ok(self.registry.count(&filter)?)
    }

    fn persist_usage(&self, tally: &mut UsageTally) {
        for record in tally.take_records() {
            if let Err(e) = self.registry.record_usage(&record) {
                warn!(purpose = %record.purpose, "Failed to record usage: {}", e);
            }
        }
    }

    pub(super) async fn converse_job(&self, id: &str) -> Result<usize, OrchestratorError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            return Ok(0);
        };
        let item = self
            .registry
            .get(id)?
            .ok_or_else(|| OrchestratorError::ItemNotFound(id.to_string()))?;
        if item.status.is_terminal() || item.status.rank() < ItemStatus::Accepted.rank() {
            return Ok(0);
        }

        let expected = item.status;
        let mut item = item;
        let mut ctx = StageContext::new(id);
        let result = self.handle_messages(&item, &mut ctx).await;
        self.persist_usage(&mut ctx.tally);
        let handled = result?;

        // The approval message is now known; the next advance relies on the flag.
        if handled.approved {
            item.approval_received = true;
        }
        if !ctx.actions.is_empty() || handled.approved {
            match self.registry.commit_stage(&item, expected, &ctx.actions) {
                Ok(_) | Err(RegistryError::Conflict { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(handled.new_messages)
    }
}
