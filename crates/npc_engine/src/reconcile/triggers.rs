use std::sync::mpsc::{self, Receiver, Sender};

use thiserror::Error;

use crate::providers::ProviderError;
use crate::settings::NpcSettings;
use crate::types::{ActorId, EntityId, Location, WorldLoadKind};

/// Lifecycle events the engine reconciles against.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    EntityCreated { entity: EntityId, anchor: Location },
    EntityDestroyed { entity: EntityId },
    WorldBecameAvailable { world: String, kind: WorldLoadKind },
    WorldBecameUnavailable { world: String },
    ShowRequested { entity: EntityId },
    HideRequested { entity: EntityId },
    ToggleRequested { entity: EntityId },
    MoveRequested { entity: EntityId, location: Location },
    ReconcileAll,
    Repair,
    ConfigReloaded(Box<NpcSettings>),
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntityCreated { .. } => "entity_created",
            Self::EntityDestroyed { .. } => "entity_destroyed",
            Self::WorldBecameAvailable { .. } => "world_available",
            Self::WorldBecameUnavailable { .. } => "world_unavailable",
            Self::ShowRequested { .. } => "show",
            Self::HideRequested { .. } => "hide",
            Self::ToggleRequested { .. } => "toggle",
            Self::MoveRequested { .. } => "move",
            Self::ReconcileAll => "reconcile_all",
            Self::Repair => "repair",
            Self::ConfigReloaded(_) => "config_reloaded",
        }
    }
}

/// Work queued on the main-context scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum HostTask {
    Run(Trigger),
    WorldPass { world: String, kind: WorldLoadKind },
    FlushRecords,
}

/// Cloneable handle for producers outside the main context. Triggers are
/// picked up at the start of the next tick.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    inner: Sender<Trigger>,
}

impl TriggerSender {
    /// Returns false once the engine is gone.
    pub fn send(&self, trigger: Trigger) -> bool {
        self.inner.send(trigger).is_ok()
    }
}

pub(crate) fn trigger_channel() -> (TriggerSender, Receiver<Trigger>) {
    let (inner, inbox) = mpsc::channel();
    (TriggerSender { inner }, inbox)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("island {0} has no actor record")]
    NoRecord(EntityId),
    #[error("island {0} is not known to the ownership provider")]
    UnknownEntity(EntityId),
    #[error("island {entity}: {source}")]
    Provider {
        entity: EntityId,
        #[source]
        source: ProviderError,
    },
}

impl ReconcileError {
    pub(crate) fn provider(entity: EntityId, source: ProviderError) -> Self {
        Self::Provider { entity, source }
    }

    pub(crate) fn world_not_loaded(entity: EntityId, world: &str) -> Self {
        Self::Provider {
            entity,
            source: ProviderError::WorldNotLoaded(world.to_string()),
        }
    }

    pub fn is_world_not_loaded(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                source: ProviderError::WorldNotLoaded(_),
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Spawned(ActorId),
    /// A live handle already existed; nothing was created.
    AlreadyLive,
    /// Hidden under a despawn backend, so no actor is expected.
    LeftHidden,
    WorldNotLoaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    Removed { had_actor: bool },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityOutcome {
    Shown,
    Hidden,
    AlreadyShown,
    AlreadyHidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    MovedInPlace,
    Respawned,
    /// No live actor; only the stored location changed.
    RecordOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub considered: usize,
    pub restored: usize,
    pub already_live: usize,
    pub left_hidden: usize,
    pub other_partition: usize,
    pub failed: usize,
    pub skipped_unloaded: bool,
}

impl PassReport {
    pub(crate) fn absorb(&mut self, outcome: &Result<CreateOutcome, ReconcileError>) {
        self.considered += 1;
        match outcome {
            Ok(CreateOutcome::Spawned(_)) => self.restored += 1,
            Ok(CreateOutcome::AlreadyLive) => self.already_live += 1,
            Ok(CreateOutcome::LeftHidden) => self.left_hidden += 1,
            Ok(CreateOutcome::WorldNotLoaded) | Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub total: usize,
    pub fixed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Created(CreateOutcome),
    Destroyed(DestroyOutcome),
    WorldQueued { pass_scheduled: bool },
    WorldUnloaded { released: usize },
    Visibility(VisibilityOutcome),
    Moved(MoveOutcome),
    Reconciled(PassReport),
    Repaired(RepairReport),
    Reloaded { respawned: usize },
}
