use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::types::{ActorId, EntityId, LabelId};

/// Runtime handle for a spawned actor and its label. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveActor {
    pub actor: ActorId,
    pub label: Option<LabelId>,
    pub visible: bool,
}

impl LiveActor {
    pub fn new(actor: ActorId, label: Option<LabelId>) -> Self {
        Self {
            actor,
            label,
            visible: true,
        }
    }
}

/// Which entities have a live actor right now. Main-context only.
#[derive(Debug, Default)]
pub struct ActorRegistry {
    live: HashMap<EntityId, LiveActor>,
    by_actor: HashMap<ActorId, EntityId>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Refuses to replace a different live actor for the same entity. The
    /// rejected handle comes back so the caller can despawn it.
    pub fn register(&mut self, entity: EntityId, handle: LiveActor) -> Result<(), LiveActor> {
        if let Some(previous) = self.live.get(&entity) {
            if previous.actor != handle.actor {
                warn!(
                    entity = %entity,
                    live = %previous.actor,
                    rejected = %handle.actor,
                    "registry_rejected_second_handle"
                );
                return Err(handle);
            }
        }
        self.by_actor.insert(handle.actor.clone(), entity);
        self.live.insert(entity, handle);
        Ok(())
    }

    pub fn get(&self, entity: &EntityId) -> Option<&LiveActor> {
        self.live.get(entity)
    }

    pub(crate) fn get_mut(&mut self, entity: &EntityId) -> Option<&mut LiveActor> {
        self.live.get_mut(entity)
    }

    pub fn contains(&self, entity: &EntityId) -> bool {
        self.live.contains_key(entity)
    }

    pub fn unregister(&mut self, entity: &EntityId) -> Option<LiveActor> {
        let handle = self.live.remove(entity)?;
        self.by_actor.remove(&handle.actor);
        Some(handle)
    }

    pub fn all_entity_ids(&self) -> BTreeSet<EntityId> {
        self.live.keys().copied().collect()
    }

    pub fn entity_for_actor(&self, actor: &ActorId) -> Option<EntityId> {
        self.by_actor.get(actor).copied()
    }
}
