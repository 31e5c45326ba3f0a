use std::env;
use std::io;
use std::process::ExitCode;

use npcctl::{parse_args, run};

fn main() -> ExitCode {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help")) {
        println!("{}", usage_text());
        return ExitCode::SUCCESS;
    }

    let result = parse_args(&args)
        .map_err(|message| format!("{message}\n\n{}", usage_text()))
        .and_then(|invocation| run(invocation, &mut io::stdout()));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn usage_text() -> String {
    [
        "npcctl - island npc host command port client",
        "",
        "Usage:",
        "  npcctl [options] wait-ready",
        "  npcctl [options] send <line...>",
        "  npcctl [options] script <file> [--barrier]",
        "  npcctl [options] barrier",
        "  npcctl [options] hide|show|toggle|move|create|delete <player>",
        "  npcctl [options] fixall|reload|status|actors",
        "",
        "Options:",
        "  --port <u16>        (default 46101)",
        "  --timeout-ms <u64>  (default 5000)",
        "  --retry-ms <u64>    (default 100)",
        "  --raw               also print unprefixed lines",
    ]
    .join("\n")
}
