//! Operator command surface. Every subcommand is turned into an engine
//! trigger; nothing here touches actors or records directly.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::reconcile::{
    CreateOutcome, DestroyOutcome, Reconciler, Trigger, TriggerOutcome, VisibilityOutcome,
};
use crate::settings::load_settings;
use crate::types::{EntityId, Location, PlayerId};

pub const ADMIN_PERMISSION: &str = "islandnpc.admin";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("{reason}. usage: {usage}")]
    Usage { reason: String, usage: String },
    #[error("unterminated quoted string")]
    UnterminatedQuote,
    #[error("duplicate command registration: {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeCommand {
    Help,
    Create,
    Delete,
    Hide,
    Show,
    Toggle,
    Move,
    FixAll,
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Open to everyone under `default_allow`, otherwise needs the node.
    Player(&'static str),
    Admin,
    Anyone,
}

type ParseFn = fn(&[String]) -> Result<FacadeCommand, CommandError>;

struct CommandSpec {
    name: &'static str,
    help: &'static str,
    access: Access,
    player_bound: bool,
    parse: ParseFn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerContext {
    pub id: PlayerId,
    pub location: Option<Location>,
    pub permissions: BTreeSet<String>,
}

impl PlayerContext {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            location: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_permission(mut self, node: impl Into<String>) -> Self {
        self.permissions.insert(node.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandSender {
    Console,
    Player(PlayerContext),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Message {
        key: &'static str,
        detail: Option<String>,
    },
    Help(Vec<String>),
}

impl CommandReply {
    fn key(key: &'static str) -> Self {
        Self::Message { key, detail: None }
    }

    fn detailed(key: &'static str, detail: impl Into<String>) -> Self {
        Self::Message {
            key,
            detail: Some(detail.into()),
        }
    }

    pub fn message_key(&self) -> Option<&'static str> {
        match self {
            Self::Message { key, .. } => Some(key),
            Self::Help(_) => None,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::Message { key, detail: None } => vec![(*key).to_string()],
            Self::Message {
                key,
                detail: Some(detail),
            } => vec![format!("{key}: {detail}")],
            Self::Help(lines) => lines.clone(),
        }
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}

pub struct CommandFacade {
    specs: Vec<CommandSpec>,
    lookup_by_lower_name: HashMap<String, usize>,
    settings_path: Option<PathBuf>,
}

impl CommandFacade {
    /// `settings_path` is re-read by `reload`; without it reload re-applies
    /// the current settings.
    pub fn new(settings_path: Option<PathBuf>) -> Self {
        let mut facade = Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
            settings_path,
        };
        for spec in builtin_specs() {
            if let Err(error) = facade.register(spec) {
                warn!(error = %error, "facade_builtin_registration_failed");
            }
        }
        facade
    }

    fn register(&mut self, spec: CommandSpec) -> Result<(), CommandError> {
        let lower = spec.name.to_ascii_lowercase();
        if self.lookup_by_lower_name.contains_key(&lower) {
            return Err(CommandError::Duplicate(spec.name.to_string()));
        }
        self.specs.push(spec);
        self.lookup_by_lower_name.insert(lower, self.specs.len() - 1);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        let index = self.lookup_by_lower_name.get(&name.to_ascii_lowercase())?;
        self.specs.get(*index)
    }

    pub fn help_lines(&self) -> Vec<String> {
        self.specs
            .iter()
            .map(|spec| format!("{} - {}", spec.name, spec.help))
            .collect()
    }

    pub fn parse(&self, line: &str) -> Result<FacadeCommand, CommandError> {
        self.resolve(line).map(|(_, command)| command)
    }

    fn resolve(&self, line: &str) -> Result<(Option<&CommandSpec>, FacadeCommand), CommandError> {
        let tokens = tokenize_line(line)?;
        let Some((name, args)) = tokens.split_first() else {
            return Ok((None, FacadeCommand::Help));
        };
        let spec = self
            .lookup(name)
            .ok_or_else(|| CommandError::Unknown(name.clone()))?;
        let command = (spec.parse)(args)?;
        Ok((Some(spec), command))
    }

    pub fn execute(
        &self,
        engine: &mut Reconciler,
        sender: &CommandSender,
        line: &str,
    ) -> CommandReply {
        let (spec, command) = match self.resolve(line) {
            Ok(resolved) => resolved,
            Err(CommandError::Unknown(_)) => return CommandReply::key("unknown-command"),
            Err(error) => return CommandReply::detailed("usage-error", error.to_string()),
        };
        let Some(spec) = spec.filter(|_| command != FacadeCommand::Help) else {
            return CommandReply::Help(self.help_lines());
        };

        let player = match sender {
            CommandSender::Player(player) => Some(player),
            CommandSender::Console if spec.player_bound => {
                return CommandReply::key("players-only")
            }
            CommandSender::Console => None,
        };
        if let Some(player) = player {
            if !has_access(engine, player, spec.access) {
                return CommandReply::key("no-permission");
            }
        }

        info!(
            command = spec.name,
            sender = player.map(|p| p.id.0.as_str()).unwrap_or("console"),
            "facade_command"
        );

        match (command, player) {
            (FacadeCommand::FixAll, _) => fix_all(engine),
            (FacadeCommand::Reload, _) => self.reload(engine),
            (_, Some(player)) => player_command(engine, command, player),
            (_, None) => CommandReply::key("players-only"),
        }
    }

    fn reload(&self, engine: &mut Reconciler) -> CommandReply {
        let settings = match &self.settings_path {
            Some(path) => match load_settings(path) {
                Ok(settings) => settings,
                Err(error) => {
                    warn!(error = %error, "facade_reload_failed");
                    return CommandReply::detailed("reload-failed", error.to_string());
                }
            },
            None => engine.settings().clone(),
        };
        match engine.handle_now(Trigger::ConfigReloaded(Box::new(settings))) {
            Ok(TriggerOutcome::Reloaded { respawned }) => {
                CommandReply::detailed("reload-success", format!("respawned:{respawned}"))
            }
            Ok(_) => CommandReply::key("reload-success"),
            Err(error) => CommandReply::detailed("reload-failed", error.to_string()),
        }
    }
}

fn has_access(engine: &Reconciler, player: &PlayerContext, access: Access) -> bool {
    match access {
        Access::Anyone => true,
        Access::Admin => player.permissions.contains(ADMIN_PERMISSION),
        Access::Player(node) => {
            engine.settings().permissions.default_allow
                || player.permissions.contains(node)
                || player.permissions.contains(ADMIN_PERMISSION)
        }
    }
}

fn fix_all(engine: &mut Reconciler) -> CommandReply {
    match engine.handle_now(Trigger::Repair) {
        Ok(TriggerOutcome::Repaired(report)) => CommandReply::detailed(
            "fixall-complete",
            format!("total:{} fixed:{}", report.total, report.fixed),
        ),
        Ok(_) => CommandReply::key("fixall-complete"),
        Err(error) => CommandReply::detailed("command-failed", error.to_string()),
    }
}

fn player_command(
    engine: &mut Reconciler,
    command: FacadeCommand,
    player: &PlayerContext,
) -> CommandReply {
    let Some(entity) = engine.providers().ownership.lookup_owner(&player.id) else {
        return CommandReply::key("no-island");
    };

    match command {
        FacadeCommand::Create => create(engine, entity),
        FacadeCommand::Delete => match engine.handle_now(Trigger::EntityDestroyed { entity }) {
            Ok(TriggerOutcome::Destroyed(DestroyOutcome::NotFound)) => {
                CommandReply::key("npc-not-found")
            }
            Ok(_) => CommandReply::key("npc-deleted"),
            Err(error) => CommandReply::detailed("command-failed", error.to_string()),
        },
        FacadeCommand::Hide => visibility(engine, Trigger::HideRequested { entity }),
        FacadeCommand::Show => visibility(engine, Trigger::ShowRequested { entity }),
        FacadeCommand::Toggle => visibility(engine, Trigger::ToggleRequested { entity }),
        FacadeCommand::Move => {
            if !engine.store().contains(&entity) {
                return CommandReply::key("npc-not-found");
            }
            let Some(location) = player.location.clone() else {
                return CommandReply::key("no-location");
            };
            match engine.handle_now(Trigger::MoveRequested { entity, location }) {
                Ok(_) => CommandReply::key("npc-moved"),
                Err(error) => failure_reply(error),
            }
        }
        FacadeCommand::Help | FacadeCommand::FixAll | FacadeCommand::Reload => {
            CommandReply::key("unknown-command")
        }
    }
}

fn create(engine: &mut Reconciler, entity: EntityId) -> CommandReply {
    let Some(anchor) = engine.providers().ownership.center_location(&entity) else {
        return CommandReply::key("npc-create-failed");
    };
    match engine.handle_now(Trigger::EntityCreated { entity, anchor }) {
        Ok(TriggerOutcome::Created(CreateOutcome::WorldNotLoaded)) => {
            CommandReply::key("world-not-loaded")
        }
        Ok(TriggerOutcome::Created(CreateOutcome::LeftHidden)) => {
            CommandReply::key("npc-already-hidden")
        }
        Ok(_) => CommandReply::key("npc-created"),
        Err(error) => CommandReply::detailed("npc-create-failed", error.to_string()),
    }
}

fn visibility(engine: &mut Reconciler, trigger: Trigger) -> CommandReply {
    match engine.handle_now(trigger) {
        Ok(TriggerOutcome::Visibility(outcome)) => CommandReply::key(match outcome {
            VisibilityOutcome::Shown => "npc-shown",
            VisibilityOutcome::Hidden => "npc-hidden",
            VisibilityOutcome::AlreadyShown => "npc-already-visible",
            VisibilityOutcome::AlreadyHidden => "npc-already-hidden",
        }),
        Ok(_) => CommandReply::key("command-failed"),
        Err(error) => failure_reply(error),
    }
}

fn failure_reply(error: crate::reconcile::ReconcileError) -> CommandReply {
    if error.is_world_not_loaded() {
        return CommandReply::key("world-not-loaded");
    }
    match error {
        crate::reconcile::ReconcileError::NoRecord(_) => CommandReply::key("npc-not-found"),
        other => CommandReply::detailed("command-failed", other.to_string()),
    }
}

fn builtin_specs() -> Vec<CommandSpec> {
    vec![
        spec("help", "List commands", Access::Anyone, false, |args| {
            no_args(args, "help", FacadeCommand::Help)
        }),
        spec("hide", "Hide your island NPC", Access::Player("islandnpc.hide"), true, |args| {
            no_args(args, "hide", FacadeCommand::Hide)
        }),
        spec("show", "Show your island NPC", Access::Player("islandnpc.show"), true, |args| {
            no_args(args, "show", FacadeCommand::Show)
        }),
        spec(
            "toggle",
            "Toggle your island NPC visibility",
            Access::Player("islandnpc.toggle"),
            true,
            |args| no_args(args, "toggle", FacadeCommand::Toggle),
        ),
        spec(
            "move",
            "Move your island NPC to where you stand",
            Access::Player("islandnpc.move"),
            true,
            |args| no_args(args, "move", FacadeCommand::Move),
        ),
        spec("fixall", "Recreate missing island NPCs", Access::Admin, false, |args| {
            no_args(args, "fixall", FacadeCommand::FixAll)
        }),
        spec("create", "Create the NPC for your island", Access::Admin, true, |args| {
            no_args(args, "create", FacadeCommand::Create)
        }),
        spec("delete", "Delete the NPC for your island", Access::Admin, true, |args| {
            no_args(args, "delete", FacadeCommand::Delete)
        }),
        spec("reload", "Reload settings and respawn NPCs", Access::Admin, false, |args| {
            no_args(args, "reload", FacadeCommand::Reload)
        }),
    ]
}

fn spec(
    name: &'static str,
    help: &'static str,
    access: Access,
    player_bound: bool,
    parse: ParseFn,
) -> CommandSpec {
    CommandSpec {
        name,
        help,
        access,
        player_bound,
        parse,
    }
}

fn no_args(
    args: &[String],
    usage: &str,
    command: FacadeCommand,
) -> Result<FacadeCommand, CommandError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(CommandError::Usage {
            reason: "unexpected extra arguments".to_string(),
            usage: usage.to_string(),
        })
    }
}

/// Whitespace-separated tokens; double quotes group a token.
pub fn tokenize_line(line: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending = false;

    for ch in line.trim().chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                pending = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            _ => {
                current.push(ch);
                pending = true;
            }
        }
    }

    if in_quotes {
        return Err(CommandError::UnterminatedQuote);
    }
    if pending {
        tokens.push(current);
    }
    Ok(tokens)
}
