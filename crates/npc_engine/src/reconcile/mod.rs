//! The reconciliation engine: brings live actors back into agreement with
//! stored records as lifecycle triggers arrive.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::host::{EngineCounters, MetricsHandle, Scheduler};
use crate::interaction::{route_interaction, InteractionOutcome};
use crate::providers::Providers;
use crate::readiness::WorldReadiness;
use crate::registry::ActorRegistry;
use crate::settings::NpcSettings;
use crate::store::{DebouncedWriter, FlushOutcome, RecordStore, RecordStoreError};
use crate::types::{ActorId, PlayerId, WorldLoadKind};

mod lifecycle;
mod triggers;
mod visibility;


pub use triggers::{
    CreateOutcome, DestroyOutcome, HostTask, MoveOutcome, PassReport, ReconcileError,
    RepairReport, Trigger, TriggerOutcome, TriggerSender, VisibilityOutcome,
};

pub struct Reconciler {
    settings: NpcSettings,
    registry: ActorRegistry,
    store: RecordStore,
    writer: DebouncedWriter,
    readiness: Arc<WorldReadiness>,
    scheduler: Scheduler<HostTask>,
    providers: Providers,
    inbox: Receiver<Trigger>,
    sender: TriggerSender,
    counters: EngineCounters,
    metrics: MetricsHandle,
}

impl Reconciler {
    pub fn new(
        settings: NpcSettings,
        store: RecordStore,
        writer: DebouncedWriter,
        providers: Providers,
    ) -> Self {
        let (sender, inbox) = triggers::trigger_channel();
        let mut writer = writer;
        writer.set_debounce_ticks(settings.timing.save_debounce_ticks);
        info!(
            records = store.len(),
            actor_backend = providers.actors.name(),
            label_backend = providers.labels.as_ref().map(|labels| labels.name()).unwrap_or("none"),
            ownership_backend = providers.ownership.name(),
            deferred_worlds = ?providers.deferred_worlds,
            "reconciler_started"
        );
        Self {
            settings,
            registry: ActorRegistry::new(),
            store,
            writer,
            readiness: Arc::new(WorldReadiness::new()),
            scheduler: Scheduler::new(),
            providers,
            inbox,
            sender,
            counters: EngineCounters::default(),
            metrics: MetricsHandle::default(),
        }
    }

    pub fn settings(&self) -> &NpcSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn readiness(&self) -> Arc<WorldReadiness> {
        Arc::clone(&self.readiness)
    }

    pub fn current_tick(&self) -> u64 {
        self.scheduler.current_tick()
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.pending_count()
    }

    pub fn trigger_sender(&self) -> TriggerSender {
        self.sender.clone()
    }

    pub fn metrics_handle(&self) -> MetricsHandle {
        self.metrics.clone()
    }

    /// Queues a trigger with its configured grace delay.
    ///
    /// World load and unload triggers are handled right away, in arrival
    /// order, so the loaded flag always reflects the last signal. The world
    /// pass itself carries the grace delay.
    pub fn submit(&mut self, trigger: Trigger) {
        let timing = self.settings.timing;
        let delay = match &trigger {
            Trigger::WorldBecameAvailable { .. } | Trigger::WorldBecameUnavailable { .. } => {
                self.run_logged(trigger);
                return;
            }
            Trigger::EntityCreated { .. } => timing.entity_created_delay_ticks,
            Trigger::ReconcileAll => timing.startup_reconcile_delay_ticks,
            _ => 0,
        };
        debug!(trigger = trigger.name(), delay_ticks = delay, "trigger_queued");
        self.scheduler.schedule_after(delay, HostTask::Run(trigger));
    }

    /// Executes a trigger on the spot and reports what happened.
    pub fn handle_now(&mut self, trigger: Trigger) -> Result<TriggerOutcome, ReconcileError> {
        match trigger {
            Trigger::EntityCreated { entity, anchor } => self
                .handle_entity_created(entity, &anchor)
                .map(TriggerOutcome::Created),
            Trigger::EntityDestroyed { entity } => {
                Ok(TriggerOutcome::Destroyed(self.handle_entity_destroyed(entity)))
            }
            Trigger::WorldBecameAvailable { world, kind } => Ok(TriggerOutcome::WorldQueued {
                pass_scheduled: self.handle_world_available(&world, kind),
            }),
            Trigger::WorldBecameUnavailable { world } => Ok(TriggerOutcome::WorldUnloaded {
                released: self.handle_world_unavailable(&world),
            }),
            Trigger::ShowRequested { entity } => {
                self.show(entity).map(TriggerOutcome::Visibility)
            }
            Trigger::HideRequested { entity } => {
                self.hide(entity).map(TriggerOutcome::Visibility)
            }
            Trigger::ToggleRequested { entity } => {
                self.toggle(entity).map(TriggerOutcome::Visibility)
            }
            Trigger::MoveRequested { entity, location } => {
                self.move_actor(entity, location).map(TriggerOutcome::Moved)
            }
            Trigger::ReconcileAll => Ok(TriggerOutcome::Reconciled(self.reconcile_all())),
            Trigger::Repair => Ok(TriggerOutcome::Repaired(self.repair())),
            Trigger::ConfigReloaded(settings) => Ok(TriggerOutcome::Reloaded {
                respawned: self.reload(*settings),
            }),
        }
    }

    /// One host tick: drain off-context triggers, run due tasks, collect
    /// flush results. Returns the number of tasks run.
    pub fn tick(&mut self) -> usize {
        let incoming: Vec<Trigger> = self.inbox.try_iter().collect();
        for trigger in incoming {
            self.submit(trigger);
        }

        let due = self.scheduler.advance();
        let ran = due.len();
        for task in due {
            match task {
                HostTask::Run(trigger) => self.run_logged(trigger),
                HostTask::WorldPass { world, kind } => {
                    self.run_world_pass(&world, kind);
                }
                HostTask::FlushRecords => self.writer.flush(&self.store),
            }
        }

        self.collect_flush_outcomes();
        self.publish_metrics();
        ran
    }

    /// Drives the scheduler until nothing is pending or `max_ticks` elapse.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        let mut ticks = 0;
        while ticks < max_ticks && self.scheduler.pending_count() > 0 {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    pub fn interact(&mut self, player: &PlayerId, actor: &ActorId) -> InteractionOutcome {
        let providers = &mut self.providers;
        route_interaction(
            &self.registry,
            &self.store,
            providers.quests.as_deref_mut(),
            providers.dialogs.as_deref_mut(),
            player,
            actor,
        )
    }

    /// Final synchronous save. Pending tasks are dropped.
    pub fn shutdown(&mut self) -> Result<(), RecordStoreError> {
        let dropped = self.scheduler.drain_all();
        let outcomes = self.writer.shutdown(&mut self.scheduler, &self.store)?;
        self.count_flushes(&outcomes);
        self.publish_metrics();
        info!(
            records = self.store.len(),
            dropped_tasks = dropped.len(),
            "reconciler_shutdown_saved"
        );
        Ok(())
    }

    fn run_logged(&mut self, trigger: Trigger) {
        let name = trigger.name();
        match self.handle_now(trigger) {
            Ok(outcome) => debug!(trigger = name, outcome = ?outcome, "trigger_handled"),
            Err(error) => {
                self.counters.reconcile_failures += 1;
                warn!(trigger = name, error = %error, "trigger_failed");
            }
        }
    }

    fn persist(&mut self) {
        self.writer
            .mark_dirty(&mut self.scheduler, HostTask::FlushRecords);
    }

    fn collect_flush_outcomes(&mut self) {
        let outcomes = self.writer.drain_outcomes();
        self.count_flushes(&outcomes);
    }

    fn count_flushes(&mut self, outcomes: &[FlushOutcome]) {
        for outcome in outcomes {
            match outcome {
                FlushOutcome::Written { .. } => self.counters.flushes_ok += 1,
                FlushOutcome::Failed { .. } => self.counters.flushes_failed += 1,
            }
        }
    }

    fn publish_metrics(&self) {
        self.metrics.publish(self.counters.to_snapshot(
            self.scheduler.current_tick(),
            self.registry.len(),
            self.store.len(),
        ));
    }

    fn world_delay(&self, kind: WorldLoadKind) -> u64 {
        match kind {
            WorldLoadKind::Standard => self.settings.timing.world_load_delay_ticks,
            WorldLoadKind::Deferred => self.settings.timing.deferred_world_load_delay_ticks,
        }
    }
}
