//! Capability contracts for the backends the engine drives.
//!
//! Every call happens on the main context, so implementations need not be
//! thread-safe.

use thiserror::Error;

use crate::settings::{LabelStyle, RenderOptions};
use crate::types::{ActorId, EntityId, LabelId, Location, PlayerId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{backend} is not available: {reason}")]
    Unavailable { backend: String, reason: String },
    #[error("world '{0}' is not loaded")]
    WorldNotLoaded(String),
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

/// How an actor backend represents a hidden actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HideModel {
    /// The actor keeps its identity and is only made invisible.
    InPlace,
    /// Hiding removes the actor; showing spawns a new one.
    Despawn,
}

/// Whether a lazy-loading world backend is installed. Resolved once at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeferredWorldSupport {
    #[default]
    Absent,
    Present,
}

pub trait OwnershipProvider {
    fn name(&self) -> &str;
    fn lookup_owner(&self, player: &PlayerId) -> Option<EntityId>;
    fn center_location(&self, entity: &EntityId) -> Option<Location>;
    fn owner_name(&self, entity: &EntityId) -> Option<String>;
    fn exists(&self, entity: &EntityId) -> bool;
    fn active_entities(&self) -> Vec<EntityId>;
}

pub trait ActorProvider {
    fn name(&self) -> &str;
    fn hide_model(&self) -> HideModel;
    fn spawn(
        &mut self,
        entity: &EntityId,
        location: &Location,
        options: &RenderOptions,
    ) -> Result<ActorId, ProviderError>;
    fn despawn(&mut self, actor: &ActorId) -> Result<(), ProviderError>;
    fn is_alive(&self, actor: &ActorId) -> bool;

    fn move_to(&mut self, _actor: &ActorId, _location: &Location) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported("move"))
    }

    fn hide(&mut self, _actor: &ActorId) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported("in-place hide"))
    }

    fn show(&mut self, _actor: &ActorId) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported("in-place show"))
    }

    /// Forget a handle whose world unloaded. The platform already removed
    /// the actor, so this must not try to despawn it.
    fn release(&mut self, _actor: &ActorId) {}
}

pub trait LabelProvider {
    fn name(&self) -> &str;
    fn create_label(
        &mut self,
        id: &LabelId,
        location: &Location,
        lines: &[String],
        style: &LabelStyle,
    ) -> Result<LabelId, ProviderError>;
    fn delete_label(&mut self, id: &LabelId) -> Result<(), ProviderError>;
    fn move_label(&mut self, id: &LabelId, location: &Location) -> Result<(), ProviderError>;
    fn hide_label(&mut self, id: &LabelId) -> Result<(), ProviderError>;
    fn show_label(&mut self, id: &LabelId) -> Result<(), ProviderError>;

    fn release(&mut self, _id: &LabelId) {}
}

/// The platform's view of worlds.
pub trait WorldCatalog {
    fn is_loaded(&self, world: &str) -> bool;
    fn loaded_worlds(&self) -> Vec<String>;
    /// `None` when the world cannot be classified right now.
    fn is_deferred_world(&self, world: &str) -> Option<bool>;
}

pub trait DialogProvider {
    fn open_dialog(&mut self, player: &PlayerId, dialog_id: &str) -> Result<(), ProviderError>;
}

pub trait QuestBridge {
    fn has_active_event(&self, player: &PlayerId, actor: &ActorId) -> bool;
    fn trigger_events(&mut self, player: &PlayerId, actor: &ActorId);
}

pub struct Providers {
    pub ownership: Box<dyn OwnershipProvider>,
    pub actors: Box<dyn ActorProvider>,
    pub labels: Option<Box<dyn LabelProvider>>,
    pub worlds: Box<dyn WorldCatalog>,
    pub deferred_worlds: DeferredWorldSupport,
    pub dialogs: Option<Box<dyn DialogProvider>>,
    pub quests: Option<Box<dyn QuestBridge>>,
}

impl Providers {
    pub fn new(
        ownership: Box<dyn OwnershipProvider>,
        actors: Box<dyn ActorProvider>,
        worlds: Box<dyn WorldCatalog>,
    ) -> Self {
        Self {
            ownership,
            actors,
            labels: None,
            worlds,
            deferred_worlds: DeferredWorldSupport::Absent,
            dialogs: None,
            quests: None,
        }
    }

    pub fn with_labels(mut self, labels: Box<dyn LabelProvider>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_deferred_worlds(mut self, support: DeferredWorldSupport) -> Self {
        self.deferred_worlds = support;
        self
    }

    pub fn with_dialogs(mut self, dialogs: Box<dyn DialogProvider>) -> Self {
        self.dialogs = Some(dialogs);
        self
    }

    pub fn with_quests(mut self, quests: Box<dyn QuestBridge>) -> Self {
        self.quests = Some(quests);
        self
    }

    /// Classifies a world for records that predate the deferred flag.
    pub fn classify_world(&self, world: &str) -> Option<bool> {
        match self.deferred_worlds {
            DeferredWorldSupport::Absent => Some(false),
            DeferredWorldSupport::Present => self.worlds.is_deferred_world(world),
        }
    }
}
