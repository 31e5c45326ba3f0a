use tracing::{debug, info, warn};

use super::triggers::{CreateOutcome, MoveOutcome, ReconcileError, VisibilityOutcome};
use super::Reconciler;
use crate::providers::{HideModel, ProviderError};
use crate::registry::LiveActor;
use crate::store::{ActorRecord, LabelDescriptor};
use crate::types::{EntityId, Location};

impl Reconciler {
    /// Fails with `WorldNotLoaded` and changes nothing when the actor's world
    /// is not loaded.
    pub(crate) fn show(&mut self, entity: EntityId) -> Result<VisibilityOutcome, ReconcileError> {
        let record = self.record_for(entity)?;
        if !record.hidden {
            return Ok(VisibilityOutcome::AlreadyShown);
        }
        if !self.readiness.is_loaded(record.world()) {
            return Err(ReconcileError::world_not_loaded(entity, record.world()));
        }

        let revealed_in_place = match self.registry.get(&entity).map(|live| live.actor.clone()) {
            Some(actor) if self.providers.actors.hide_model() == HideModel::InPlace => {
                self.providers
                    .actors
                    .show(&actor)
                    .map_err(|source| ReconcileError::provider(entity, source))?;
                if let Some(live) = self.registry.get_mut(&entity) {
                    live.visible = true;
                    if let (Some(labels), Some(label)) = (self.providers.labels.as_mut(), &live.label) {
                        if let Err(error) = labels.show_label(label) {
                            debug!(entity = %entity, error = %error, "label_show_failed");
                        }
                    }
                }
                true
            }
            _ => false,
        };

        if !revealed_in_place {
            if let Some(stale) = self.registry.unregister(&entity) {
                self.destroy_live(entity, &stale);
            }
            let live = self.spawn_live(entity, &record, true)?;
            let actor = live.actor.clone();
            self.register_and_stamp(entity, live);
            debug!(entity = %entity, actor = %actor, "actor_respawned_for_show");
        }

        if let Some(stored) = self.store.get_mut(&entity) {
            stored.hidden = false;
        }
        self.persist();
        info!(entity = %entity, in_place = revealed_in_place, "actor_shown");
        Ok(VisibilityOutcome::Shown)
    }

    pub(crate) fn hide(&mut self, entity: EntityId) -> Result<VisibilityOutcome, ReconcileError> {
        let record = self.record_for(entity)?;
        if record.hidden {
            return Ok(VisibilityOutcome::AlreadyHidden);
        }

        let model = self.providers.actors.hide_model();
        match (model, self.registry.get(&entity).map(|live| live.actor.clone())) {
            (HideModel::InPlace, Some(actor)) => {
                self.providers
                    .actors
                    .hide(&actor)
                    .map_err(|source| ReconcileError::provider(entity, source))?;
                if let Some(live) = self.registry.get_mut(&entity) {
                    live.visible = false;
                    if let (Some(labels), Some(label)) = (self.providers.labels.as_mut(), &live.label) {
                        if let Err(error) = labels.hide_label(label) {
                            debug!(entity = %entity, error = %error, "label_hide_failed");
                        }
                    }
                }
            }
            (HideModel::Despawn, Some(_)) => {
                if let Some(live) = self.registry.unregister(&entity) {
                    self.destroy_live(entity, &live);
                }
            }
            (_, None) => {}
        }

        if let Some(stored) = self.store.get_mut(&entity) {
            stored.hidden = true;
        }
        self.persist();
        info!(entity = %entity, model = ?model, "actor_hidden");
        Ok(VisibilityOutcome::Hidden)
    }

    pub(crate) fn toggle(&mut self, entity: EntityId) -> Result<VisibilityOutcome, ReconcileError> {
        if self.record_for(entity)?.hidden {
            self.show(entity)
        } else {
            self.hide(entity)
        }
    }

    /// Same-world moves try the backend's in-place move first; anything else
    /// respawns at the new location with the stored visibility.
    pub(crate) fn move_actor(
        &mut self,
        entity: EntityId,
        location: Location,
    ) -> Result<MoveOutcome, ReconcileError> {
        let previous = self.record_for(entity)?;
        let same_world = previous.world() == location.world;

        if let Some(stored) = self.store.get_mut(&entity) {
            stored.location = location.clone();
            if !same_world {
                stored.is_deferred_world = None;
            }
        }
        if !same_world {
            self.classify_record(entity);
        }
        self.persist();

        let Some(actor) = self.registry.get(&entity).map(|live| live.actor.clone()) else {
            info!(entity = %entity, location = %location, "actor_record_moved");
            return Ok(MoveOutcome::RecordOnly);
        };

        if same_world {
            match self.providers.actors.move_to(&actor, &location) {
                Ok(()) => {
                    self.move_label(entity, &location);
                    info!(entity = %entity, location = %location, "actor_moved_in_place");
                    return Ok(MoveOutcome::MovedInPlace);
                }
                Err(ProviderError::Unsupported(_)) => {}
                Err(error) => {
                    warn!(entity = %entity, error = %error, "actor_move_failed_respawning");
                }
            }
        }

        if let Some(live) = self.registry.unregister(&entity) {
            self.destroy_live(entity, &live);
        }
        match self.ensure_live(entity)? {
            CreateOutcome::Spawned(actor) => {
                info!(entity = %entity, actor = %actor, location = %location, "actor_respawned_at_new_location");
                Ok(MoveOutcome::Respawned)
            }
            _ => Ok(MoveOutcome::RecordOnly),
        }
    }

    fn move_label(&mut self, entity: EntityId, actor_location: &Location) {
        let label_location = self.settings.label_location(actor_location);
        let label = self.registry.get(&entity).and_then(|live| live.label.clone());
        if let (Some(labels), Some(label)) = (self.providers.labels.as_mut(), label) {
            if let Err(error) = labels.move_label(&label, &label_location) {
                warn!(entity = %entity, error = %error, "label_move_failed");
            }
        }
    }

    fn register_and_stamp(&mut self, entity: EntityId, live: LiveActor) {
        let actor = live.actor.clone();
        let label = live.label.clone();
        if !self.adopt_live(entity, live) {
            return;
        }
        let lines = label.as_ref().map(|_| self.label_lines_for(entity));
        if let Some(stored) = self.store.get_mut(&entity) {
            stored.actor_id = Some(actor);
            stored.label = label.map(|id| LabelDescriptor {
                id,
                lines: lines.unwrap_or_default(),
            });
        }
    }

    fn record_for(&self, entity: EntityId) -> Result<ActorRecord, ReconcileError> {
        self.store
            .get(&entity)
            .cloned()
            .ok_or(ReconcileError::NoRecord(entity))
    }
}
