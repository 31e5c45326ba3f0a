//! Recording fake backends shared by the engine tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::providers::{
    ActorProvider, DeferredWorldSupport, DialogProvider, HideModel, LabelProvider,
    OwnershipProvider, ProviderError, Providers, WorldCatalog,
};
use crate::reconcile::{Reconciler, Trigger};
use crate::settings::{LabelStyle, NpcSettings, RenderOptions, TimingSettings};
use crate::store::{DebouncedWriter, FlushMode, RecordStore, SnapshotSink};
use crate::types::{ActorId, EntityId, LabelId, Location, PlayerId, WorldLoadKind};

#[derive(Debug, Clone)]
pub(crate) struct FakeActor {
    pub entity: EntityId,
    pub location: Location,
    pub hidden: bool,
    pub options: RenderOptions,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeLabel {
    pub location: Location,
    pub lines: Vec<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeOwner {
    pub player: PlayerId,
    pub name: String,
    pub center: Location,
}

#[derive(Debug, Default)]
pub(crate) struct FakePlatform {
    pub next_actor: u64,
    pub actors: BTreeMap<ActorId, FakeActor>,
    pub spawn_calls: usize,
    pub despawn_calls: usize,
    pub released_actors: Vec<ActorId>,
    pub labels: BTreeMap<LabelId, FakeLabel>,
    pub released_labels: Vec<LabelId>,
    pub labels_down: bool,
    pub failing_spawns: HashSet<EntityId>,
    pub owners: BTreeMap<EntityId, FakeOwner>,
    pub loaded: BTreeSet<String>,
    pub deferred: BTreeSet<String>,
    pub supports_move: bool,
    pub dialogs_opened: Vec<(PlayerId, String)>,
}

impl FakePlatform {
    pub fn actors_for(&self, entity: EntityId) -> Vec<&FakeActor> {
        self.actors
            .values()
            .filter(|actor| actor.entity == entity)
            .collect()
    }

    /// The platform drops every actor and label in a world when it unloads.
    pub fn unload(&mut self, world: &str) {
        self.loaded.remove(world);
        self.actors.retain(|_, actor| actor.location.world != world);
        self.labels.retain(|_, label| label.location.world != world);
    }
}

pub(crate) type SharedPlatform = Rc<RefCell<FakePlatform>>;

struct FakeOwnership(SharedPlatform);

impl OwnershipProvider for FakeOwnership {
    fn name(&self) -> &str {
        "FAKE_ISLANDS"
    }

    fn lookup_owner(&self, player: &PlayerId) -> Option<EntityId> {
        self.0
            .borrow()
            .owners
            .iter()
            .find(|(_, owner)| &owner.player == player)
            .map(|(entity, _)| *entity)
    }

    fn center_location(&self, entity: &EntityId) -> Option<Location> {
        self.0.borrow().owners.get(entity).map(|owner| owner.center.clone())
    }

    fn owner_name(&self, entity: &EntityId) -> Option<String> {
        self.0.borrow().owners.get(entity).map(|owner| owner.name.clone())
    }

    fn exists(&self, entity: &EntityId) -> bool {
        self.0.borrow().owners.contains_key(entity)
    }

    fn active_entities(&self) -> Vec<EntityId> {
        self.0.borrow().owners.keys().copied().collect()
    }
}

struct FakeActors {
    platform: SharedPlatform,
    model: HideModel,
}

impl ActorProvider for FakeActors {
    fn name(&self) -> &str {
        "FAKE_ACTORS"
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
        let mut platform = self.platform.borrow_mut();
        if platform.failing_spawns.contains(entity) {
            return Err(ProviderError::Unavailable {
                backend: "FAKE_ACTORS".to_string(),
                reason: "spawn refused".to_string(),
            });
        }
        if !platform.loaded.contains(&location.world) {
            return Err(ProviderError::WorldNotLoaded(location.world.clone()));
        }
        platform.next_actor += 1;
        platform.spawn_calls += 1;
        let id = ActorId(platform.next_actor.to_string());
        platform.actors.insert(
            id.clone(),
            FakeActor {
                entity: *entity,
                location: location.clone(),
                hidden: false,
                options: options.clone(),
            },
        );
        Ok(id)
    }

    fn despawn(&mut self, actor: &ActorId) -> Result<(), ProviderError> {
        let mut platform = self.platform.borrow_mut();
        platform.despawn_calls += 1;
        platform
            .actors
            .remove(actor)
            .map(|_| ())
            .ok_or_else(|| ProviderError::Rejected(format!("unknown actor {actor}")))
    }

    fn is_alive(&self, actor: &ActorId) -> bool {
        self.platform.borrow().actors.contains_key(actor)
    }

    fn move_to(&mut self, actor: &ActorId, location: &Location) -> Result<(), ProviderError> {
        let mut platform = self.platform.borrow_mut();
        if !platform.supports_move {
            return Err(ProviderError::Unsupported("move"));
        }
        let spawned = platform
            .actors
            .get_mut(actor)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown actor {actor}")))?;
        spawned.location = location.clone();
        Ok(())
    }

    fn hide(&mut self, actor: &ActorId) -> Result<(), ProviderError> {
        self.set_hidden(actor, true)
    }

    fn show(&mut self, actor: &ActorId) -> Result<(), ProviderError> {
        self.set_hidden(actor, false)
    }

    fn release(&mut self, actor: &ActorId) {
        self.platform.borrow_mut().released_actors.push(actor.clone());
    }
}

impl FakeActors {
    fn set_hidden(&mut self, actor: &ActorId, hidden: bool) -> Result<(), ProviderError> {
        if self.model == HideModel::Despawn {
            return Err(ProviderError::Unsupported("in-place hide"));
        }
        let mut platform = self.platform.borrow_mut();
        let spawned = platform
            .actors
            .get_mut(actor)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown actor {actor}")))?;
        spawned.hidden = hidden;
        Ok(())
    }
}

struct FakeLabels(SharedPlatform);

impl FakeLabels {
    fn with_label(
        &mut self,
        id: &LabelId,
        apply: impl FnOnce(&mut FakeLabel),
    ) -> Result<(), ProviderError> {
        let mut platform = self.0.borrow_mut();
        let label = platform
            .labels
            .get_mut(id)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown label {id}")))?;
        apply(label);
        Ok(())
    }
}

impl LabelProvider for FakeLabels {
    fn name(&self) -> &str {
        "FAKE_LABELS"
    }

    fn create_label(
        &mut self,
        id: &LabelId,
        location: &Location,
        lines: &[String],
        _style: &LabelStyle,
    ) -> Result<LabelId, ProviderError> {
        let mut platform = self.0.borrow_mut();
        if platform.labels_down {
            return Err(ProviderError::Unavailable {
                backend: "FAKE_LABELS".to_string(),
                reason: "plugin disabled".to_string(),
            });
        }
        platform.labels.insert(
            id.clone(),
            FakeLabel {
                location: location.clone(),
                lines: lines.to_vec(),
                hidden: false,
            },
        );
        Ok(id.clone())
    }

    fn delete_label(&mut self, id: &LabelId) -> Result<(), ProviderError> {
        self.0
            .borrow_mut()
            .labels
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::Rejected(format!("unknown label {id}")))
    }

    fn move_label(&mut self, id: &LabelId, location: &Location) -> Result<(), ProviderError> {
        let location = location.clone();
        self.with_label(id, move |label| label.location = location)
    }

    fn hide_label(&mut self, id: &LabelId) -> Result<(), ProviderError> {
        self.with_label(id, |label| label.hidden = true)
    }

    fn show_label(&mut self, id: &LabelId) -> Result<(), ProviderError> {
        self.with_label(id, |label| label.hidden = false)
    }

    fn release(&mut self, id: &LabelId) {
        self.0.borrow_mut().released_labels.push(id.clone());
    }
}

struct FakeWorlds(SharedPlatform);

impl WorldCatalog for FakeWorlds {
    fn is_loaded(&self, world: &str) -> bool {
        self.0.borrow().loaded.contains(world)
    }

    fn loaded_worlds(&self) -> Vec<String> {
        self.0.borrow().loaded.iter().cloned().collect()
    }

    fn is_deferred_world(&self, world: &str) -> Option<bool> {
        let platform = self.0.borrow();
        platform
            .loaded
            .contains(world)
            .then(|| platform.deferred.contains(world))
    }
}

struct FakeDialogs(SharedPlatform);

impl DialogProvider for FakeDialogs {
    fn open_dialog(&mut self, player: &PlayerId, dialog_id: &str) -> Result<(), ProviderError> {
        self.0
            .borrow_mut()
            .dialogs_opened
            .push((player.clone(), dialog_id.to_string()));
        Ok(())
    }
}

/// Counts every snapshot written and keeps the last one.
#[derive(Debug, Clone, Default)]
pub(crate) struct CountingSink {
    pub writes: Arc<Mutex<Vec<String>>>,
}

impl CountingSink {
    pub fn count(&self) -> usize {
        self.writes.lock().map(|writes| writes.len()).unwrap_or(0)
    }
}

impl SnapshotSink for CountingSink {
    fn write_snapshot(&mut self, _path: &Path, text: &str) -> io::Result<()> {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(text.to_string());
        }
        Ok(())
    }
}

pub(crate) struct Harness {
    pub engine: Reconciler,
    pub platform: SharedPlatform,
    pub sink: CountingSink,
}

pub(crate) struct HarnessOptions {
    pub model: HideModel,
    pub settings: NpcSettings,
    pub store: RecordStore,
    pub deferred_support: DeferredWorldSupport,
    pub labels: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        let mut settings = NpcSettings::default();
        settings.timing = TimingSettings::immediate();
        Self {
            model: HideModel::InPlace,
            settings,
            store: RecordStore::new(),
            deferred_support: DeferredWorldSupport::Present,
            labels: true,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let platform: SharedPlatform = Rc::new(RefCell::new(FakePlatform::default()));
        let sink = CountingSink::default();
        let writer = DebouncedWriter::new(
            PathBuf::from("npcs.json"),
            options.settings.timing.save_debounce_ticks,
            Box::new(sink.clone()),
            FlushMode::Inline,
        );
        let mut providers = Providers::new(
            Box::new(FakeOwnership(Rc::clone(&platform))),
            Box::new(FakeActors {
                platform: Rc::clone(&platform),
                model: options.model,
            }),
            Box::new(FakeWorlds(Rc::clone(&platform))),
        )
        .with_deferred_worlds(options.deferred_support)
        .with_dialogs(Box::new(FakeDialogs(Rc::clone(&platform))));
        if options.labels {
            providers = providers.with_labels(Box::new(FakeLabels(Rc::clone(&platform))));
        }
        let engine = Reconciler::new(options.settings, options.store, writer, providers);
        Self {
            engine,
            platform,
            sink,
        }
    }

    pub fn add_island(&self, player: &str, center: Location) -> EntityId {
        let entity = EntityId::new_random();
        self.platform.borrow_mut().owners.insert(
            entity,
            FakeOwner {
                player: PlayerId(player.to_string()),
                name: player.to_string(),
                center,
            },
        );
        entity
    }

    /// Loads the world on the platform and delivers the matching signal.
    pub fn load_world(&mut self, world: &str, kind: WorldLoadKind) {
        {
            let mut platform = self.platform.borrow_mut();
            platform.loaded.insert(world.to_string());
            if kind.is_deferred() {
                platform.deferred.insert(world.to_string());
            }
        }
        self.engine.submit(Trigger::WorldBecameAvailable {
            world: world.to_string(),
            kind,
        });
    }

    pub fn unload_world(&mut self, world: &str) {
        self.platform.borrow_mut().unload(world);
        self.engine.submit(Trigger::WorldBecameUnavailable {
            world: world.to_string(),
        });
    }

    pub fn ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.engine.tick();
        }
    }

    pub fn spawn_calls(&self) -> usize {
        self.platform.borrow().spawn_calls
    }

    pub fn live_actor_count(&self) -> usize {
        self.platform.borrow().actors.len()
    }
}
