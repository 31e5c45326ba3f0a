use npc_engine::{
    ActorId, CommandFacade, CommandSender, EntityId, InteractionOutcome, PlayerContext, PlayerId,
    Reconciler, Trigger, WorldLoadKind,
};
use tracing::{info, warn};

use super::sim::SharedSim;
use super::sim_commands::{parse_host_line, HostCommand, HOST_HELP};

/// Everything the main context owns: the engine, the façade and the
/// simulated platform it drives.
pub(crate) struct HostSession {
    pub(crate) engine: Reconciler,
    facade: CommandFacade,
    sim: SharedSim,
    quit_requested: bool,
}

impl HostSession {
    pub(crate) fn new(engine: Reconciler, facade: CommandFacade, sim: SharedSim) -> Self {
        Self {
            engine,
            facade,
            sim,
            quit_requested: false,
        }
    }

    pub(crate) fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Runs one protocol line and returns the reply lines.
    pub(crate) fn execute_line(&mut self, line: &str) -> Vec<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        match parse_host_line(trimmed) {
            Ok(command) => self.execute(command),
            Err(message) => vec![message],
        }
    }

    fn execute(&mut self, command: HostCommand) -> Vec<String> {
        match command {
            HostCommand::Help => HOST_HELP.iter().map(|line| (*line).to_string()).collect(),
            HostCommand::As { player, line } => {
                let context = self.player_context(&player);
                let reply = self
                    .facade
                    .execute(&mut self.engine, &CommandSender::Player(context), &line);
                reply.lines().into_iter().map(|line| format!("ok: {line}")).collect()
            }
            HostCommand::Console { line } => {
                let reply = self
                    .facade
                    .execute(&mut self.engine, &CommandSender::Console, &line);
                reply.lines().into_iter().map(|line| format!("ok: {line}")).collect()
            }
            HostCommand::WorldLoad { world, kind } => {
                self.sim.borrow_mut().load_world(&world, kind.is_deferred());
                if kind == WorldLoadKind::Deferred {
                    // the lazy loader reports the generic signal too
                    self.engine.submit(Trigger::WorldBecameAvailable {
                        world: world.clone(),
                        kind: WorldLoadKind::Standard,
                    });
                }
                self.engine.submit(Trigger::WorldBecameAvailable {
                    world: world.clone(),
                    kind,
                });
                vec![format!("ok: world {world} loaded kind:{kind:?}")]
            }
            HostCommand::WorldUnload { world } => {
                let dropped = self.sim.borrow_mut().unload_world(&world);
                self.engine.submit(Trigger::WorldBecameUnavailable {
                    world: world.clone(),
                });
                vec![format!("ok: world {world} unloaded actors:{dropped}")]
            }
            HostCommand::IslandCreate { player, center } => {
                let existing = self.sim.borrow().island_of(&player);
                if let Some(entity) = existing {
                    return vec![format!("error: {player} already owns island {entity}")];
                }
                let entity = EntityId::new_random();
                self.sim.borrow_mut().islands.insert(
                    entity,
                    super::sim::SimIsland {
                        owner: player.clone(),
                        center: center.clone(),
                    },
                );
                info!(entity = %entity, player = %player, "sim_island_created");
                self.engine.submit(Trigger::EntityCreated {
                    entity,
                    anchor: center,
                });
                vec![format!("ok: island {entity} owner:{player}")]
            }
            HostCommand::IslandDisband { player } => {
                let entity = self.sim.borrow().island_of(&player);
                let Some(entity) = entity else {
                    return vec![format!("error: {player} owns no island")];
                };
                self.sim.borrow_mut().islands.remove(&entity);
                self.engine.submit(Trigger::EntityDestroyed { entity });
                vec![format!("ok: island {entity} disbanded")]
            }
            HostCommand::PlayerPos { player, location } => {
                let summary = location.to_string();
                self.sim.borrow_mut().player_mut(&player).location = Some(location);
                vec![format!("ok: {player} at {summary}")]
            }
            HostCommand::PlayerGrant { player, node } => {
                self.sim
                    .borrow_mut()
                    .player_mut(&player)
                    .permissions
                    .insert(node.clone());
                vec![format!("ok: granted {node} to {player}")]
            }
            HostCommand::Interact { player, actor } => {
                match self.engine.interact(&player, &ActorId(actor)) {
                    InteractionOutcome::PassThrough => vec!["ok: interaction passthrough".to_string()],
                    InteractionOutcome::DialogOpened { dialog_id } => {
                        vec![format!("ok: dialog {dialog_id}")]
                    }
                    InteractionOutcome::Unhandled => vec!["ok: interaction unhandled".to_string()],
                }
            }
            HostCommand::Actors => match serde_json::to_string(&self.sim.borrow().actor_views()) {
                Ok(json) => vec![format!("ok: {json}")],
                Err(error) => {
                    warn!(error = %error, "actor_dump_failed");
                    vec![format!("error: {error}")]
                }
            },
            HostCommand::Tick(count) => {
                for _ in 0..count {
                    self.engine.tick();
                }
                vec![format!("ok: tick {}", self.engine.current_tick())]
            }
            HostCommand::Status => {
                let snapshot = self.engine.metrics_handle().snapshot();
                let sim = self.sim.borrow();
                vec![format!(
                    "islandnpc.status v1 {} worlds:{} labels:{} pending:{}",
                    snapshot.render_status_line(),
                    sim.loaded.len(),
                    sim.label_count(),
                    self.engine.pending_tasks()
                )]
            }
            HostCommand::Sync => vec!["ok: sync".to_string()],
            HostCommand::Quit => {
                self.quit_requested = true;
                vec!["ok: quitting".to_string()]
            }
        }
    }

    fn player_context(&self, player: &PlayerId) -> PlayerContext {
        let sim = self.sim.borrow();
        let mut context = PlayerContext::new(player.clone());
        if let Some(state) = sim.players.get(player) {
            context.location = state.location.clone();
            context.permissions = state.permissions.clone();
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    use npc_engine::{
        DebouncedWriter, FileSink, FlushMode, NpcSettings, RecordStore, TimingSettings,
    };

    use super::super::sim::{build_providers, SimState};
    use super::*;

    fn session(dir: &std::path::Path) -> HostSession {
        let mut settings = NpcSettings::default();
        settings.timing = TimingSettings::immediate();
        let sim: SharedSim = Rc::new(RefCell::new(SimState::default()));
        let providers = build_providers(&sim, &settings);
        let writer = DebouncedWriter::new(
            dir.join("npcs.json"),
            0,
            Box::new(FileSink),
            FlushMode::Inline,
        );
        let engine = Reconciler::new(settings, RecordStore::new(), writer, providers);
        HostSession::new(engine, CommandFacade::new(None::<PathBuf>), sim)
    }

    fn run(session: &mut HostSession, line: &str) -> Vec<String> {
        session.execute_line(line)
    }

    #[test]
    fn island_lifecycle_through_protocol_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());

        run(&mut session, "world load skyblock");
        run(&mut session, "island create alice skyblock 100 64 200");
        run(&mut session, "tick 2");
        assert_eq!(session.engine.registry().len(), 1);

        assert_eq!(run(&mut session, "as alice hide"), vec!["ok: npc-hidden"]);
        assert_eq!(run(&mut session, "as alice show"), vec!["ok: npc-shown"]);

        run(&mut session, "player pos alice skyblock 110 64 205");
        assert_eq!(run(&mut session, "as alice move"), vec!["ok: npc-moved"]);

        let actors = run(&mut session, "actors");
        assert!(actors[0].contains("\"x\":110.0"), "{actors:?}");

        run(&mut session, "island disband alice");
        run(&mut session, "tick 1");
        assert!(session.engine.store().is_empty());
        assert!(temp.path().join("npcs.json").is_file());
    }

    #[test]
    fn unload_and_reload_restores_actor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());
        run(&mut session, "world load skyblock");
        run(&mut session, "island create bob skyblock 0 64 0");
        run(&mut session, "tick 2");

        assert_eq!(
            run(&mut session, "world unload skyblock"),
            vec!["ok: world skyblock unloaded actors:1"]
        );
        run(&mut session, "tick 2");
        assert!(session.engine.registry().is_empty());

        run(&mut session, "world load skyblock deferred");
        run(&mut session, "tick 2");
        assert_eq!(session.engine.registry().len(), 1);
        let status = run(&mut session, "status");
        assert!(status[0].starts_with("islandnpc.status v1 tick:"));
        assert!(status[0].contains("live:1"));
    }

    #[test]
    fn console_and_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());
        assert_eq!(run(&mut session, "console hide"), vec!["ok: players-only"]);
        assert_eq!(run(&mut session, "as nobody hide"), vec!["ok: no-island"]);
        assert_eq!(
            run(&mut session, "island disband nobody"),
            vec!["error: nobody owns no island"]
        );
        assert_eq!(
            run(&mut session, "interact alice citizens-9"),
            vec!["ok: interaction unhandled"]
        );
        assert!(run(&mut session, "").is_empty());
        assert_eq!(run(&mut session, "quit"), vec!["ok: quitting"]);
        assert!(session.quit_requested());
    }
}
