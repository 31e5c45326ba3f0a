//! In-memory platform standing in for the real ownership, actor, label and
//! dialog backends.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use npc_engine::{
    ActorId, ActorProvider, DeferredWorldSupport, DialogProvider, EntityId, HideModel, LabelId,
    LabelProvider, LabelStyle, Location, NpcSettings, OwnershipProvider, PlayerId, ProviderError,
    Providers, RenderOptions, WorldCatalog,
};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub(crate) struct SimIsland {
    pub(crate) owner: PlayerId,
    pub(crate) center: Location,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SimPlayer {
    pub(crate) location: Option<Location>,
    pub(crate) permissions: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimActor {
    pub(crate) actor: String,
    pub(crate) entity: String,
    pub(crate) world: String,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) z: f64,
    pub(crate) kind: String,
    pub(crate) hidden: bool,
}

#[derive(Debug, Clone)]
struct SimLabel {
    world: String,
    hidden: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SimState {
    pub(crate) islands: BTreeMap<EntityId, SimIsland>,
    pub(crate) players: BTreeMap<PlayerId, SimPlayer>,
    pub(crate) loaded: BTreeSet<String>,
    pub(crate) deferred: BTreeSet<String>,
    actors: BTreeMap<ActorId, SimActor>,
    labels: BTreeMap<LabelId, SimLabel>,
    next_actor: u64,
}

impl SimState {
    pub(crate) fn island_of(&self, player: &PlayerId) -> Option<EntityId> {
        self.islands
            .iter()
            .find(|(_, island)| &island.owner == player)
            .map(|(entity, _)| *entity)
    }

    pub(crate) fn player_mut(&mut self, player: &PlayerId) -> &mut SimPlayer {
        self.players.entry(player.clone()).or_default()
    }

    pub(crate) fn load_world(&mut self, world: &str, deferred: bool) {
        self.loaded.insert(world.to_string());
        if deferred {
            self.deferred.insert(world.to_string());
        }
    }

    /// Unloading a world takes its actors and labels with it.
    pub(crate) fn unload_world(&mut self, world: &str) -> usize {
        self.loaded.remove(world);
        let before = self.actors.len();
        self.actors.retain(|_, actor| actor.world != world);
        self.labels.retain(|_, label| label.world != world);
        before - self.actors.len()
    }

    pub(crate) fn actor_views(&self) -> Vec<SimActor> {
        self.actors.values().cloned().collect()
    }

    pub(crate) fn label_count(&self) -> usize {
        self.labels.len()
    }
}

pub(crate) type SharedSim = Rc<RefCell<SimState>>;

/// Picks the actor backend named by `npc.provider` and wires every provider
/// to the shared state.
pub(crate) fn build_providers(sim: &SharedSim, settings: &NpcSettings) -> Providers {
    let model = match settings.npc.provider.to_ascii_uppercase().as_str() {
        "CITIZENS" => HideModel::InPlace,
        "FANCYNPCS" => HideModel::Despawn,
        other => {
            warn!(provider = other, fallback = "CITIZENS", "unknown_actor_provider");
            HideModel::InPlace
        }
    };
    let backend = match model {
        HideModel::InPlace => "CITIZENS",
        HideModel::Despawn => "FANCYNPCS",
    };
    info!(backend, hide_model = ?model, "sim_actor_backend_selected");

    let mut providers = Providers::new(
        Box::new(SimOwnership(Rc::clone(sim))),
        Box::new(SimActors {
            sim: Rc::clone(sim),
            backend,
            model,
        }),
        Box::new(SimWorlds(Rc::clone(sim))),
    )
    .with_deferred_worlds(DeferredWorldSupport::Present)
    .with_dialogs(Box::new(SimDialogs));
    if settings.label.enabled {
        providers = providers.with_labels(Box::new(SimLabels(Rc::clone(sim))));
    }
    providers
}

struct SimOwnership(SharedSim);

impl OwnershipProvider for SimOwnership {
    fn name(&self) -> &str {
        "SIM_ISLANDS"
    }

    fn lookup_owner(&self, player: &PlayerId) -> Option<EntityId> {
        self.0.borrow().island_of(player)
    }

    fn center_location(&self, entity: &EntityId) -> Option<Location> {
        self.0
            .borrow()
            .islands
            .get(entity)
            .map(|island| island.center.clone())
    }

    fn owner_name(&self, entity: &EntityId) -> Option<String> {
        self.0
            .borrow()
            .islands
            .get(entity)
            .map(|island| island.owner.0.clone())
    }

    fn exists(&self, entity: &EntityId) -> bool {
        self.0.borrow().islands.contains_key(entity)
    }

    fn active_entities(&self) -> Vec<EntityId> {
        self.0.borrow().islands.keys().copied().collect()
    }
}

struct SimActors {
    sim: SharedSim,
    backend: &'static str,
    model: HideModel,
}

impl SimActors {
    fn with_actor<R>(
        &self,
        actor: &ActorId,
        apply: impl FnOnce(&mut SimActor) -> R,
    ) -> Result<R, ProviderError> {
        let mut sim = self.sim.borrow_mut();
        let entry = sim
            .actors
            .get_mut(actor)
            .ok_or_else(|| ProviderError::Rejected(format!("no actor {actor}")))?;
        Ok(apply(entry))
    }
}

impl ActorProvider for SimActors {
    fn name(&self) -> &str {
        self.backend
    }

    fn hide_model(&self) -> HideModel {
        self.model
    }

    fn spawn(
        &mut self,
        entity: &EntityId,
        location: &Location,
        options: &RenderOptions,
    ) -> Result<ActorId, ProviderError> {
        let mut sim = self.sim.borrow_mut();
        if !sim.loaded.contains(&location.world) {
            return Err(ProviderError::WorldNotLoaded(location.world.clone()));
        }
        sim.next_actor += 1;
        let actor = ActorId(format!("{}-{}", self.backend.to_ascii_lowercase(), sim.next_actor));
        sim.actors.insert(
            actor.clone(),
            SimActor {
                actor: actor.0.clone(),
                entity: entity.to_string(),
                world: location.world.clone(),
                x: location.x,
                y: location.y,
                z: location.z,
                kind: format!("{:?}", options.entity_kind),
                hidden: false,
            },
        );
        debug!(actor = %actor, entity = %entity, "sim_actor_spawned");
        Ok(actor)
    }

    fn despawn(&mut self, actor: &ActorId) -> Result<(), ProviderError> {
        self.sim.borrow_mut().actors.remove(actor);
        Ok(())
    }

    fn is_alive(&self, actor: &ActorId) -> bool {
        self.sim.borrow().actors.contains_key(actor)
    }

    fn move_to(&mut self, actor: &ActorId, location: &Location) -> Result<(), ProviderError> {
        if self.model == HideModel::Despawn {
            return Err(ProviderError::Unsupported("move"));
        }
        self.with_actor(actor, |entry| {
            entry.world = location.world.clone();
            entry.x = location.x;
            entry.y = location.y;
            entry.z = location.z;
        })
    }

    fn hide(&mut self, actor: &ActorId) -> Result<(), ProviderError> {
        self.with_actor(actor, |entry| entry.hidden = true)
    }

    fn show(&mut self, actor: &ActorId) -> Result<(), ProviderError> {
        self.with_actor(actor, |entry| entry.hidden = false)
    }
}

struct SimLabels(SharedSim);

impl SimLabels {
    fn set_hidden(&mut self, id: &LabelId, hidden: bool) -> Result<(), ProviderError> {
        match self.0.borrow_mut().labels.get_mut(id) {
            Some(label) => {
                label.hidden = hidden;
                Ok(())
            }
            None => Err(ProviderError::Rejected(format!("no label {id}"))),
        }
    }
}

impl LabelProvider for SimLabels {
    fn name(&self) -> &str {
        "FANCYHOLOGRAMS"
    }

    fn create_label(
        &mut self,
        id: &LabelId,
        location: &Location,
        lines: &[String],
        _style: &LabelStyle,
    ) -> Result<LabelId, ProviderError> {
        let mut sim = self.0.borrow_mut();
        if !sim.loaded.contains(&location.world) {
            return Err(ProviderError::WorldNotLoaded(location.world.clone()));
        }
        sim.labels.insert(
            id.clone(),
            SimLabel {
                world: location.world.clone(),
                hidden: false,
            },
        );
        debug!(label = %id, lines = lines.len(), "sim_label_created");
        Ok(id.clone())
    }

    fn delete_label(&mut self, id: &LabelId) -> Result<(), ProviderError> {
        self.0.borrow_mut().labels.remove(id);
        Ok(())
    }

    fn move_label(&mut self, id: &LabelId, location: &Location) -> Result<(), ProviderError> {
        match self.0.borrow_mut().labels.get_mut(id) {
            Some(label) => {
                label.world = location.world.clone();
                Ok(())
            }
            None => Err(ProviderError::Rejected(format!("no label {id}"))),
        }
    }

    fn hide_label(&mut self, id: &LabelId) -> Result<(), ProviderError> {
        self.set_hidden(id, true)
    }

    fn show_label(&mut self, id: &LabelId) -> Result<(), ProviderError> {
        self.set_hidden(id, false)
    }
}

struct SimWorlds(SharedSim);

impl WorldCatalog for SimWorlds {
    fn is_loaded(&self, world: &str) -> bool {
        self.0.borrow().loaded.contains(world)
    }

    fn loaded_worlds(&self) -> Vec<String> {
        self.0.borrow().loaded.iter().cloned().collect()
    }

    fn is_deferred_world(&self, world: &str) -> Option<bool> {
        let sim = self.0.borrow();
        sim.loaded
            .contains(world)
            .then(|| sim.deferred.contains(world))
    }
}

struct SimDialogs;

impl DialogProvider for SimDialogs {
    fn open_dialog(&mut self, player: &PlayerId, dialog_id: &str) -> Result<(), ProviderError> {
        info!(player = %player, dialog_id, "sim_dialog_opened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedSim {
        Rc::new(RefCell::new(SimState::default()))
    }

    #[test]
    fn provider_name_selects_hide_model() {
        let sim = shared();
        let mut settings = NpcSettings::default();
        assert_eq!(build_providers(&sim, &settings).actors.hide_model(), HideModel::InPlace);

        settings.npc.provider = "fancynpcs".to_string();
        let providers = build_providers(&sim, &settings);
        assert_eq!(providers.actors.hide_model(), HideModel::Despawn);
        assert_eq!(providers.actors.name(), "FANCYNPCS");

        settings.npc.provider = "bogus".to_string();
        settings.label.enabled = false;
        let providers = build_providers(&sim, &settings);
        assert_eq!(providers.actors.name(), "CITIZENS");
        assert!(providers.labels.is_none());
    }

    #[test]
    fn spawn_requires_loaded_world_and_unload_drops_actors() {
        let sim = shared();
        let mut providers = build_providers(&sim, &NpcSettings::default());
        let entity = EntityId::new_random();
        let location = Location::new("skyblock", 1.0, 64.0, 2.0);
        let options = NpcSettings::default().render_options("alice".to_string(), None);

        assert_eq!(
            providers.actors.spawn(&entity, &location, &options),
            Err(ProviderError::WorldNotLoaded("skyblock".to_string()))
        );

        sim.borrow_mut().load_world("skyblock", false);
        let actor = providers
            .actors
            .spawn(&entity, &location, &options)
            .expect("spawn");
        assert!(providers.actors.is_alive(&actor));
        assert_eq!(providers.worlds.is_deferred_world("skyblock"), Some(false));

        assert_eq!(sim.borrow_mut().unload_world("skyblock"), 1);
        assert!(!providers.actors.is_alive(&actor));
        assert_eq!(providers.worlds.is_deferred_world("skyblock"), None);
    }
}
