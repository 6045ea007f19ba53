//! Periodic triggers: discovery scans, the stalled-item sweep, the
//! conversation sweep and the daily rollup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::actors::{ActionError, PacedSite};
use crate::notify::{Notification, NotificationHandle};
use crate::orchestrator::{Job, Orchestrator};
use crate::registry::{
    action_kinds, ActionOutcome, DailyStats, ItemFilter, ItemStatus, NewActionLogEntry,
    NewWorkItem, Registry, RegistryError,
};

/// Configuration for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often to scan the site for new items (seconds).
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    /// How often to re-enqueue waiting items (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Items untouched for this long are picked up by the sweep (seconds).
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold_secs: u64,

    /// How often to check conversations of accepted items (seconds).
    #[serde(default = "default_conversation_interval")]
    pub conversation_interval_secs: u64,

    /// Local hour (0-23) at which the daily summary is emitted.
    #[serde(default = "default_rollup_hour")]
    pub daily_rollup_hour: u32,
}

fn default_discovery_interval() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_stall_threshold() -> u64 {
    120
}

fn default_conversation_interval() -> u64 {
    600 // 10 minutes
}

fn default_rollup_hour() -> u32 {
    23
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: default_discovery_interval(),
            sweep_interval_secs: default_sweep_interval(),
            stall_threshold_secs: default_stall_threshold(),
            conversation_interval_secs: default_conversation_interval(),
            daily_rollup_hour: default_rollup_hour(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] ActionError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Drives the orchestrator's queue from timers.
pub struct Scheduler {
    config: SchedulerConfig,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<dyn Registry>,
    site: PacedSite,
    notifier: Option<NotificationHandle>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    last_rollup: Arc<Mutex<Option<NaiveDate>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        orchestrator: Arc<Orchestrator>,
        registry: Arc<dyn Registry>,
        site: PacedSite,
        notifier: Option<NotificationHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            orchestrator,
            registry,
            site,
            notifier,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            last_rollup: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start all periodic loops.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        info!(
            discovery_secs = self.config.discovery_interval_secs,
            sweep_secs = self.config.sweep_interval_secs,
            "Starting scheduler"
        );

        self.spawn_loop("discovery", self.config.discovery_interval_secs, |s| {
            Box::pin(async move {
                if let Err(e) = s.discover_once().await {
                    warn!("Discovery error: {}", e);
                }
            })
        });
        self.spawn_loop("sweep", self.config.sweep_interval_secs, |s| {
            Box::pin(async move {
                if let Err(e) = s.sweep_once() {
                    warn!("Sweep error: {}", e);
                }
            })
        });
        self.spawn_loop("conversation", self.config.conversation_interval_secs, |s| {
            Box::pin(async move {
                if let Err(e) = s.converse_once() {
                    warn!("Conversation sweep error: {}", e);
                }
            })
        });
        // Checked once a minute; fires at most once per day.
        self.spawn_loop("rollup", 60, |s| {
            Box::pin(async move {
                s.maybe_rollup();
            })
        });
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }
        info!("Stopping scheduler");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn spawn_loop<F>(self: &Arc<Self>, name: &'static str, interval_secs: u64, tick: F)
    where
        F: Fn(Arc<Self>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + 'static,
    {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(interval_secs.max(1));

        tokio::spawn(async move {
            info!(name, "Scheduler loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(name, "Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !scheduler.running.load(Ordering::Relaxed) {
                            break;
                        }
                        tick(Arc::clone(&scheduler)).await;
                    }
                }
            }
            info!(name, "Scheduler loop stopped");
        });
    }

    /// List the site and register new items. Returns how many were new.
    pub async fn discover_once(&self) -> Result<usize, SchedulerError> {
        let listed = self.site.list_new_items().await?;
        let mut created = 0;

        for summary in listed {
            let Some(item) = self.registry.create_if_absent(NewWorkItem {
                external_ref: summary.external_ref.clone(),
                title: summary.title.clone(),
                listed_budget: summary.budget,
            })?
            else {
                continue;
            };

            self.registry.append_action(
                NewActionLogEntry::new(&item.id, action_kinds::DISCOVER, ActionOutcome::Succeeded)
                    .with_detail(&summary.external_ref),
            )?;
            info!(item_id = %item.id, external_ref = %item.external_ref, "Item discovered");
            created += 1;

            if self.orchestrator.config().enabled {
                self.orchestrator.enqueue(Job::Advance(item.id));
            }
        }

        debug!(created, "Discovery scan finished");
        Ok(created)
    }

    /// Re-enqueue non-terminal, unparked items that have not moved recently.
    pub fn sweep_once(&self) -> Result<usize, SchedulerError> {
        if !self.orchestrator.config().enabled {
            return Ok(0);
        }
        let now = Utc::now();
        let stale_before = now - chrono::Duration::seconds(self.config.stall_threshold_secs as i64);

        let items = self
            .registry
            .list(&ItemFilter::new().non_terminal().ready_at(now))?;
        let mut queued = 0;
        for item in items.into_iter().filter(|i| i.updated_at <= stale_before) {
            if self.orchestrator.enqueue(Job::Advance(item.id)) {
                queued += 1;
            }
        }
        if queued > 0 {
            debug!(queued, "Stalled items re-enqueued");
        }
        Ok(queued)
    }

    /// Queue conversation passes for accepted items. `AwaitingApproval`
    /// items are covered by their own stage.
    pub fn converse_once(&self) -> Result<usize, SchedulerError> {
        if !self.orchestrator.config().enabled {
            return Ok(0);
        }
        let statuses = ItemStatus::ALL.into_iter().filter(|s| {
            !s.is_terminal()
                && s.rank() >= ItemStatus::Accepted.rank()
                && *s != ItemStatus::AwaitingApproval
        });
        let items = self.registry.list(&ItemFilter::new().with_statuses(statuses))?;

        let mut queued = 0;
        for item in items {
            if self.orchestrator.enqueue(Job::Conversation(item.id)) {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Emit the daily summary for `day`.
    pub fn rollup(&self, day: NaiveDate) -> Result<DailyStats, SchedulerError> {
        let stats = self.registry.daily_stats(day)?;
        info!(
            day = %stats.day,
            bids = stats.bids_placed,
            completed = stats.completed,
            cost_usd = stats.api_cost_usd,
            "Daily summary"
        );
        if let Some(ref notifier) = self.notifier {
            notifier.try_emit(Notification::DailySummary {
                stats: stats.clone(),
            });
        }
        Ok(stats)
    }

    fn maybe_rollup(&self) {
        let now = Local::now();
        if now.hour() < self.config.daily_rollup_hour {
            return;
        }
        let today = now.date_naive();
        {
            let mut last = self.last_rollup.lock().unwrap();
            if *last == Some(today) {
                return;
            }
            *last = Some(today);
        }
        if let Err(e) = self.rollup(today) {
            warn!("Daily rollup failed: {}", e);
        }
    }
}
