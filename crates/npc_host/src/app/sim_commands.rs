use npc_engine::{tokenize_line, Location, PlayerId, WorldLoadKind};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HostCommand {
    Help,
    As { player: PlayerId, line: String },
    Console { line: String },
    WorldLoad { world: String, kind: WorldLoadKind },
    WorldUnload { world: String },
    IslandCreate { player: PlayerId, center: Location },
    IslandDisband { player: PlayerId },
    PlayerPos { player: PlayerId, location: Location },
    PlayerGrant { player: PlayerId, node: String },
    Interact { player: PlayerId, actor: String },
    Actors,
    Tick(u64),
    Status,
    Sync,
    Quit,
}

pub(crate) const HOST_HELP: &[&str] = &[
    "as <player> <subcommand> - run an islandnpc subcommand as a player",
    "console <subcommand> - run an islandnpc subcommand from the console",
    "world load <name> [deferred] | world unload <name>",
    "island create <player> <world> <x> <y> <z> | island disband <player>",
    "player pos <player> <world> <x> <y> <z> | player grant <player> <node>",
    "interact <player> <actor-id>",
    "actors - dump simulated actors as json",
    "tick <n> | status | sync | quit",
];

pub(crate) fn parse_host_line(line: &str) -> Result<HostCommand, String> {
    let tokens = tokenize_line(line).map_err(|error| format!("error: {error}"))?;
    let Some((head, args)) = tokens.split_first() else {
        return Err("error: empty command".to_string());
    };

    match head.to_ascii_lowercase().as_str() {
        "help" => no_args(args, "help", HostCommand::Help),
        "as" => {
            if args.len() < 2 {
                return Err(usage("missing player or subcommand", "as <player> <subcommand>"));
            }
            Ok(HostCommand::As {
                player: PlayerId(args[0].clone()),
                line: args[1..].join(" "),
            })
        }
        "console" => {
            if args.is_empty() {
                return Err(usage("missing subcommand", "console <subcommand>"));
            }
            Ok(HostCommand::Console {
                line: args.join(" "),
            })
        }
        "world" => parse_world(args),
        "island" => parse_island(args),
        "player" => parse_player(args),
        "interact" => match args {
            [player, actor] => Ok(HostCommand::Interact {
                player: PlayerId(player.clone()),
                actor: actor.clone(),
            }),
            _ => Err(usage("expected 2 arguments", "interact <player> <actor-id>")),
        },
        "actors" => no_args(args, "actors", HostCommand::Actors),
        "tick" => match args {
            [] => Ok(HostCommand::Tick(1)),
            [count] => count
                .parse::<u64>()
                .map(HostCommand::Tick)
                .map_err(|_| usage("invalid tick count", "tick <n>")),
            _ => Err(usage("expected at most 1 argument", "tick <n>")),
        },
        "status" => no_args(args, "status", HostCommand::Status),
        "sync" => no_args(args, "sync", HostCommand::Sync),
        "quit" | "exit" => no_args(args, "quit", HostCommand::Quit),
        _ => Err(format!("error: unknown command '{head}'. try: help")),
    }
}

fn parse_world(args: &[String]) -> Result<HostCommand, String> {
    const USAGE: &str = "world load <name> [deferred] | world unload <name>";
    match args {
        [verb, world] if verb == "load" => Ok(HostCommand::WorldLoad {
            world: world.clone(),
            kind: WorldLoadKind::Standard,
        }),
        [verb, world, flag] if verb == "load" && flag == "deferred" => Ok(HostCommand::WorldLoad {
            world: world.clone(),
            kind: WorldLoadKind::Deferred,
        }),
        [verb, world] if verb == "unload" => Ok(HostCommand::WorldUnload {
            world: world.clone(),
        }),
        _ => Err(usage("invalid world command", USAGE)),
    }
}

fn parse_island(args: &[String]) -> Result<HostCommand, String> {
    const USAGE: &str = "island create <player> <world> <x> <y> <z> | island disband <player>";
    match args {
        [verb, player, rest @ ..] if verb == "create" && rest.len() == 4 => {
            Ok(HostCommand::IslandCreate {
                player: PlayerId(player.clone()),
                center: parse_location(rest, USAGE)?,
            })
        }
        [verb, player] if verb == "disband" => Ok(HostCommand::IslandDisband {
            player: PlayerId(player.clone()),
        }),
        _ => Err(usage("invalid island command", USAGE)),
    }
}

fn parse_player(args: &[String]) -> Result<HostCommand, String> {
    const USAGE: &str = "player pos <player> <world> <x> <y> <z> | player grant <player> <node>";
    match args {
        [verb, player, rest @ ..] if verb == "pos" && rest.len() == 4 => {
            Ok(HostCommand::PlayerPos {
                player: PlayerId(player.clone()),
                location: parse_location(rest, USAGE)?,
            })
        }
        [verb, player, node] if verb == "grant" => Ok(HostCommand::PlayerGrant {
            player: PlayerId(player.clone()),
            node: node.clone(),
        }),
        _ => Err(usage("invalid player command", USAGE)),
    }
}

fn parse_location(args: &[String], usage_text: &str) -> Result<Location, String> {
    let mut coords = [0.0f64; 3];
    for (slot, raw) in coords.iter_mut().zip(&args[1..]) {
        *slot = raw
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| usage(&format!("invalid coordinate '{raw}'"), usage_text))?;
    }
    Ok(Location::new(args[0].clone(), coords[0], coords[1], coords[2]))
}

fn no_args(args: &[String], usage_text: &str, command: HostCommand) -> Result<HostCommand, String> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(usage("expected no arguments", usage_text))
    }
}

fn usage(reason: &str, usage_text: &str) -> String {
    format!("error: {reason}. usage: {usage_text}")
}
