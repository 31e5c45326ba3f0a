use tracing::{debug, warn};

use crate::providers::{DialogProvider, QuestBridge};
use crate::registry::ActorRegistry;
use crate::store::RecordStore;
use crate::types::{ActorId, PlayerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// A quest event claimed the interaction.
    PassThrough,
    DialogOpened { dialog_id: String },
    Unhandled,
}

/// Quest events win over dialogs; actors that belong to no island are
/// ignored.
pub fn route_interaction(
    registry: &ActorRegistry,
    store: &RecordStore,
    quests: Option<&mut (dyn QuestBridge + 'static)>,
    dialogs: Option<&mut (dyn DialogProvider + 'static)>,
    player: &PlayerId,
    actor: &ActorId,
) -> InteractionOutcome {
    let Some(entity) = registry.entity_for_actor(actor) else {
        return InteractionOutcome::Unhandled;
    };

    if let Some(quests) = quests {
        if quests.has_active_event(player, actor) {
            quests.trigger_events(player, actor);
            debug!(player = %player, entity = %entity, "interaction_passed_to_quest");
            return InteractionOutcome::PassThrough;
        }
    }

    let Some(dialog_id) = store.get(&entity).and_then(|record| record.dialog_id.clone()) else {
        return InteractionOutcome::Unhandled;
    };
    let Some(dialogs) = dialogs else {
        return InteractionOutcome::Unhandled;
    };
    match dialogs.open_dialog(player, &dialog_id) {
        Ok(()) => InteractionOutcome::DialogOpened { dialog_id },
        Err(error) => {
            warn!(player = %player, dialog_id = %dialog_id, error = %error, "dialog_open_failed");
            InteractionOutcome::Unhandled
        }
    }
}
