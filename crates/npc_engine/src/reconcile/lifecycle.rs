use std::sync::Arc;

use tracing::{debug, info, warn};

use super::triggers::{CreateOutcome, DestroyOutcome, PassReport, ReconcileError, RepairReport};
use super::Reconciler;
use crate::providers::HideModel;
use crate::readiness::ProcessingGuard;
use crate::registry::LiveActor;
use crate::settings::NpcSettings;
use crate::store::{ActorRecord, LabelDescriptor};
use crate::types::{EntityId, LabelId, Location, WorldLoadKind};

const FALLBACK_DISPLAY_NAME: &str = "Island NPC";

impl Reconciler {
    pub(crate) fn handle_entity_created(
        &mut self,
        entity: EntityId,
        anchor: &Location,
    ) -> Result<CreateOutcome, ReconcileError> {
        if self.registry.contains(&entity) {
            self.counters.duplicate_creates_suppressed += 1;
            debug!(entity = %entity, "create_suppressed_already_live");
            return Ok(CreateOutcome::AlreadyLive);
        }
        if !self.providers.ownership.exists(&entity) {
            info!(entity = %entity, "create_skipped_island_gone");
            return Err(ReconcileError::UnknownEntity(entity));
        }
        if self.store.contains(&entity) {
            return self.ensure_live(entity);
        }
        if !self.readiness.is_loaded(&anchor.world) {
            info!(entity = %entity, world = %anchor.world, "create_skipped_world_not_loaded");
            return Ok(CreateOutcome::WorldNotLoaded);
        }

        let location = self.settings.spawn_location(anchor);
        let mut record = ActorRecord::new(location, false);
        record.is_deferred_world = self.providers.classify_world(&anchor.world);
        record.dialog_id = self.settings.default_dialog_id();

        let live = self.spawn_live(entity, &record, true)?;
        record.actor_id = Some(live.actor.clone());
        record.label = live.label.clone().map(|id| LabelDescriptor {
            id,
            lines: self.label_lines_for(entity),
        });
        let actor = live.actor.clone();
        info!(
            entity = %entity,
            actor = %actor,
            location = %record.location,
            "actor_created"
        );
        if !self.adopt_live(entity, live) {
            return Ok(CreateOutcome::AlreadyLive);
        }
        self.store.put(entity, record);
        self.persist();
        Ok(CreateOutcome::Spawned(actor))
    }

    pub(crate) fn handle_entity_destroyed(&mut self, entity: EntityId) -> DestroyOutcome {
        let had_actor = match self.registry.unregister(&entity) {
            Some(live) => {
                self.destroy_live(entity, &live);
                true
            }
            None => false,
        };
        match self.store.delete(&entity) {
            Some(_) => {
                self.persist();
                info!(entity = %entity, had_actor, "actor_record_deleted");
                DestroyOutcome::Removed { had_actor }
            }
            None if had_actor => {
                warn!(entity = %entity, "live_actor_without_record_removed");
                DestroyOutcome::Removed { had_actor }
            }
            None => DestroyOutcome::NotFound,
        }
    }

    /// Marks the world loaded and schedules its pass unless one of the same
    /// kind is already pending. Returns whether a pass was scheduled.
    pub(crate) fn handle_world_available(&mut self, world: &str, kind: WorldLoadKind) -> bool {
        self.readiness.set_loaded(world, true);
        if !self.readiness.try_begin_processing(world, kind) {
            debug!(world, kind = ?kind, "world_pass_already_pending");
            return false;
        }
        let delay = self.world_delay(kind);
        self.scheduler.schedule_after(
            delay,
            super::HostTask::WorldPass {
                world: world.to_string(),
                kind,
            },
        );
        debug!(world, kind = ?kind, delay_ticks = delay, "world_pass_scheduled");
        true
    }

    /// Live actors in an unloading world were removed by the platform; only
    /// the handles are dropped. Records stay.
    pub(crate) fn handle_world_unavailable(&mut self, world: &str) -> usize {
        self.readiness.set_loaded(world, false);
        let in_world: Vec<EntityId> = self
            .registry
            .all_entity_ids()
            .into_iter()
            .filter(|entity| {
                self.store
                    .get(entity)
                    .is_some_and(|record| record.world() == world)
            })
            .collect();
        for entity in &in_world {
            if let Some(live) = self.registry.unregister(entity) {
                self.providers.actors.release(&live.actor);
                if let (Some(labels), Some(label)) = (self.providers.labels.as_mut(), &live.label) {
                    labels.release(label);
                }
            }
        }
        info!(world, released = in_world.len(), "world_unloaded_handles_released");
        in_world.len()
    }

    /// Restores records of one load kind in a world. Holds the world's pass
    /// guard for its whole duration.
    pub(crate) fn run_world_pass(&mut self, world: &str, kind: WorldLoadKind) -> PassReport {
        let _guard = ProcessingGuard::adopt(Arc::clone(&self.readiness), world.to_string(), kind);
        self.counters.world_passes += 1;
        let mut report = PassReport::default();

        if !self.readiness.is_loaded(world) {
            info!(world, kind = ?kind, "world_pass_skipped_world_unloaded");
            report.skipped_unloaded = true;
            return report;
        }

        for entity in self.store.entity_ids_in_world(world) {
            match self.classify_record(entity) {
                Some(is_deferred) if is_deferred != kind.is_deferred() => {
                    report.other_partition += 1;
                    continue;
                }
                _ => {}
            }
            let outcome = self.ensure_live(entity);
            self.note_batch_failure(entity, &outcome);
            report.absorb(&outcome);
        }

        info!(
            world,
            kind = ?kind,
            considered = report.considered,
            restored = report.restored,
            already_live = report.already_live,
            other_partition = report.other_partition,
            failed = report.failed,
            "world_pass_completed"
        );
        report
    }

    /// Startup pass over every world the platform reports loaded. Records in
    /// other worlds wait for their load trigger.
    pub(crate) fn reconcile_all(&mut self) -> PassReport {
        for world in self.providers.worlds.loaded_worlds() {
            self.readiness.set_loaded(&world, true);
        }
        let loaded = self.readiness.loaded_worlds();
        let mut report = PassReport::default();
        for world in &loaded {
            for entity in self.store.entity_ids_in_world(world) {
                self.classify_record(entity);
                let outcome = self.ensure_live(entity);
                self.note_batch_failure(entity, &outcome);
                report.absorb(&outcome);
            }
        }
        info!(
            worlds = loaded.len(),
            records = self.store.len(),
            restored = report.restored,
            failed = report.failed,
            "reconcile_all_completed"
        );
        report
    }

    /// Recreates missing or dead actors for every island the ownership
    /// provider knows about.
    pub(crate) fn repair(&mut self) -> RepairReport {
        let mut report = RepairReport::default();
        for entity in self.providers.ownership.active_entities() {
            report.total += 1;

            if let Some(live) = self.registry.get(&entity) {
                if self.providers.actors.is_alive(&live.actor) {
                    continue;
                }
                if let Some(stale) = self.registry.unregister(&entity) {
                    warn!(entity = %entity, actor = %stale.actor, "repair_dropping_dead_actor");
                    self.providers.actors.release(&stale.actor);
                    if let (Some(labels), Some(label)) =
                        (self.providers.labels.as_mut(), &stale.label)
                    {
                        if let Err(error) = labels.delete_label(label) {
                            debug!(entity = %entity, error = %error, "repair_label_delete_failed");
                        }
                    }
                }
            }

            let outcome = match self.store.get(&entity).map(|record| record.hidden) {
                Some(true) => continue,
                Some(false) => self.ensure_live(entity),
                None => match self.providers.ownership.center_location(&entity) {
                    Some(anchor) => self.handle_entity_created(entity, &anchor),
                    None => Err(ReconcileError::UnknownEntity(entity)),
                },
            };
            self.note_batch_failure(entity, &outcome);
            if matches!(outcome, Ok(CreateOutcome::Spawned(_))) {
                report.fixed += 1;
            }
        }
        info!(total = report.total, fixed = report.fixed, "repair_completed");
        report
    }

    /// Swaps settings and respawns every live actor so the new render
    /// options and label lines apply.
    pub(crate) fn reload(&mut self, settings: NpcSettings) -> usize {
        self.writer
            .set_debounce_ticks(settings.timing.save_debounce_ticks);
        self.settings = settings;

        let mut respawned = 0;
        for entity in self.registry.all_entity_ids() {
            if let Some(live) = self.registry.unregister(&entity) {
                self.destroy_live(entity, &live);
            }
            let outcome = self.ensure_live(entity);
            self.note_batch_failure(entity, &outcome);
            if matches!(outcome, Ok(CreateOutcome::Spawned(_))) {
                respawned += 1;
            }
        }
        info!(respawned, "settings_reloaded");
        respawned
    }

    /// Brings one recorded entity to its stored state if its world is loaded.
    /// The registry check runs first so racing triggers never double-spawn.
    pub(crate) fn ensure_live(&mut self, entity: EntityId) -> Result<CreateOutcome, ReconcileError> {
        if self.registry.contains(&entity) {
            return Ok(CreateOutcome::AlreadyLive);
        }
        let record = self
            .store
            .get(&entity)
            .cloned()
            .ok_or(ReconcileError::NoRecord(entity))?;
        if !self.readiness.is_loaded(record.world()) {
            return Ok(CreateOutcome::WorldNotLoaded);
        }
        if record.hidden && self.providers.actors.hide_model() == HideModel::Despawn {
            return Ok(CreateOutcome::LeftHidden);
        }

        let live = self.spawn_live(entity, &record, !record.hidden)?;
        let actor = live.actor.clone();
        let label = live.label.clone();
        if !self.adopt_live(entity, live) {
            return Ok(CreateOutcome::AlreadyLive);
        }
        let lines = label.as_ref().map(|_| self.label_lines_for(entity));
        if let Some(stored) = self.store.get_mut(&entity) {
            stored.actor_id = Some(actor.clone());
            stored.label = label.map(|id| LabelDescriptor {
                id,
                lines: lines.unwrap_or_default(),
            });
        }
        self.persist();
        debug!(entity = %entity, actor = %actor, hidden = record.hidden, "actor_restored");
        Ok(CreateOutcome::Spawned(actor))
    }

    /// Registers a freshly spawned handle. A refused handle is despawned
    /// right away; returns whether the handle was kept.
    pub(crate) fn adopt_live(&mut self, entity: EntityId, live: LiveActor) -> bool {
        match self.registry.register(entity, live) {
            Ok(()) => true,
            Err(rejected) => {
                self.destroy_live(entity, &rejected);
                false
            }
        }
    }

    /// Spawns the actor and its label. A label failure never fails the spawn.
    pub(crate) fn spawn_live(
        &mut self,
        entity: EntityId,
        record: &ActorRecord,
        visible: bool,
    ) -> Result<LiveActor, ReconcileError> {
        let display_name = self
            .providers
            .ownership
            .owner_name(&entity)
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
        let options = self
            .settings
            .render_options(display_name, record.dialog_id.as_deref());
        let actor = self
            .providers
            .actors
            .spawn(&entity, &record.location, &options)
            .map_err(|source| ReconcileError::provider(entity, source))?;
        self.counters.actors_spawned += 1;

        let label = self.create_label(entity, &record.location);
        if !visible {
            if let Err(error) = self.providers.actors.hide(&actor) {
                warn!(entity = %entity, actor = %actor, error = %error, "actor_hide_after_spawn_failed");
            }
            if let (Some(labels), Some(label)) = (self.providers.labels.as_mut(), &label) {
                if let Err(error) = labels.hide_label(label) {
                    debug!(entity = %entity, error = %error, "label_hide_after_spawn_failed");
                }
            }
        }

        Ok(LiveActor {
            actor,
            label,
            visible,
        })
    }

    pub(crate) fn create_label(&mut self, entity: EntityId, actor_location: &Location) -> Option<LabelId> {
        if !self.settings.label.enabled {
            return None;
        }
        let lines = self.label_lines_for(entity);
        let location = self.settings.label_location(actor_location);
        let style = self.settings.label_style();
        let labels = self.providers.labels.as_mut()?;
        match labels.create_label(&entity.label_id(), &location, &lines, &style) {
            Ok(id) => Some(id),
            Err(error) => {
                warn!(entity = %entity, error = %error, "label_create_failed");
                None
            }
        }
    }

    /// Despawns a handle already taken out of the registry. Failures are
    /// logged; the handle is gone either way.
    pub(crate) fn destroy_live(&mut self, entity: EntityId, live: &LiveActor) {
        if let Err(error) = self.providers.actors.despawn(&live.actor) {
            warn!(entity = %entity, actor = %live.actor, error = %error, "actor_despawn_failed");
        }
        if let (Some(labels), Some(label)) = (self.providers.labels.as_mut(), &live.label) {
            if let Err(error) = labels.delete_label(label) {
                warn!(entity = %entity, label = %label, error = %error, "label_delete_failed");
            }
        }
    }

    /// Deferred flag for a record, probing and backfilling legacy records.
    pub(crate) fn classify_record(&mut self, entity: EntityId) -> Option<bool> {
        let record = self.store.get(&entity)?;
        if let Some(flag) = record.is_deferred_world {
            return Some(flag);
        }
        let probed = self.providers.classify_world(record.world());
        if let Some(flag) = probed {
            if let Some(stored) = self.store.get_mut(&entity) {
                stored.is_deferred_world = Some(flag);
            }
            info!(entity = %entity, is_deferred_world = flag, "legacy_record_classified");
            self.persist();
        }
        probed
    }

    pub(super) fn label_lines_for(&self, entity: EntityId) -> Vec<String> {
        let owner = self.providers.ownership.owner_name(&entity);
        self.settings.label_lines(owner.as_deref())
    }

    fn note_batch_failure(
        &mut self,
        entity: EntityId,
        outcome: &Result<CreateOutcome, ReconcileError>,
    ) {
        if let Err(error) = outcome {
            self.counters.reconcile_failures += 1;
            warn!(entity = %entity, error = %error, "entity_reconcile_failed");
        }
    }
}
