use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_PORT: u16 = 46101;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MS: u64 = 100;
pub const DEFAULT_QUIET_MS: u64 = 250;
const MAX_RETRY_BACKOFF_MS: u64 = 1_000;
const READY_PREFIX: &str = "islandnpc.ready v1 port:";
const SYNC_ACK: &str = "ok: sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtlOptions {
    pub port: u16,
    pub timeout_ms: u64,
    pub retry_ms: u64,
    /// Print lines that lack the `C ` control prefix too.
    pub raw: bool,
}

impl Default for CtlOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
            raw: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    WaitReady,
    Send { line: String },
    Script { path: String, barrier: bool },
    Barrier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub options: CtlOptions,
    pub request: Request,
}

/// Strips the control prefix. `None` for anything else the host wrote.
pub fn control_payload(raw: &str) -> Option<&str> {
    raw.trim_end_matches(['\r', '\n']).strip_prefix("C ")
}

pub fn is_ready_payload(payload: &str) -> bool {
    payload.starts_with(READY_PREFIX)
}

pub fn parse_script_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// Shortcut forms: `hide alice` becomes `as alice hide`, `fixall` becomes
/// `console fixall`.
pub fn expand_shortcut(command: &str, args: &[String]) -> Option<Result<String, String>> {
    match command {
        "hide" | "show" | "toggle" | "move" | "create" | "delete" => Some(match args {
            [player] => Ok(format!("as {player} {command}")),
            _ => Err(format!("{command} requires exactly one player name")),
        }),
        "fixall" | "reload" => Some(if args.is_empty() {
            Ok(format!("console {command}"))
        } else {
            Err(format!("{command} takes no arguments"))
        }),
        "status" | "actors" => Some(if args.is_empty() {
            Ok(command.to_string())
        } else {
            Err(format!("{command} takes no arguments"))
        }),
        _ => None,
    }
}

pub fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut options = CtlOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        let flag = args[index].as_str();
        match flag {
            "--port" => options.port = flag_value(args, index, flag)?,
            "--timeout-ms" => options.timeout_ms = flag_value(args, index, flag)?,
            "--retry-ms" => options.retry_ms = flag_value(args, index, flag)?,
            "--raw" => {
                options.raw = true;
                index += 1;
                continue;
            }
            _ => break,
        }
        index += 2;
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let rest = &args[(index + 1)..];

    let request = match command {
        "wait-ready" | "barrier" if !rest.is_empty() => {
            return Err(format!("{command} takes no arguments"))
        }
        "wait-ready" => Request::WaitReady,
        "barrier" => Request::Barrier,
        "send" if rest.is_empty() => return Err("send requires a command line".to_string()),
        "send" => Request::Send {
            line: rest.join(" "),
        },
        "script" => {
            let (path, flags) = rest
                .split_first()
                .ok_or_else(|| "script requires a file path".to_string())?;
            let mut barrier = false;
            for flag in flags {
                if flag != "--barrier" {
                    return Err(format!("unknown script argument '{flag}' (expected --barrier)"));
                }
                barrier = true;
            }
            Request::Script {
                path: path.clone(),
                barrier,
            }
        }
        other => match expand_shortcut(other, rest) {
            Some(line) => Request::Send { line: line? },
            None => return Err(format!("unknown subcommand '{other}'")),
        },
    };

    Ok(Invocation { options, request })
}

fn flag_value<T: std::str::FromStr>(args: &[String], index: usize, flag: &str) -> Result<T, String> {
    let value = args
        .get(index + 1)
        .ok_or_else(|| format!("missing value for {flag}"))?;
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{value}'"))
}

pub fn run<W: Write>(invocation: Invocation, out: &mut W) -> Result<(), String> {
    let options = invocation.options;
    let timeout = Duration::from_millis(options.timeout_ms);
    let mut emit = |raw: &str| match control_payload(raw) {
        Some(payload) => {
            let _ = writeln!(out, "{payload}");
        }
        None if options.raw => {
            let _ = writeln!(out, "{}", raw.trim_end());
        }
        None => {}
    };

    let mut conn = Connection::open_ready(options, &mut emit)?;
    match invocation.request {
        Request::WaitReady => Ok(()),
        Request::Send { line } => {
            conn.send(&line)?;
            conn.drain_until_quiet(timeout, &mut emit)
        }
        Request::Script { path, barrier } => {
            let content = fs::read_to_string(&path)
                .map_err(|error| format!("failed to read script file '{path}': {error}"))?;
            for line in parse_script_lines(&content) {
                conn.send(&line)?;
                conn.drain_until_quiet(timeout, &mut emit)?;
            }
            if barrier {
                conn.barrier(timeout, &mut emit)?;
            }
            Ok(())
        }
        Request::Barrier => conn.barrier(timeout, &mut emit),
    }
}

struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

enum ReadOutcome {
    Line(String),
    NoData,
    Disconnected,
    DeadlineExceeded,
    Failed(io::Error),
}

impl Connection {
    /// Connects with exponential backoff until the ready banner arrives.
    fn open_ready(options: CtlOptions, emit: &mut impl FnMut(&str)) -> Result<Self, String> {
        let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);
        let retry_base = options.retry_ms.max(1);
        let mut attempt = 0u32;

        while Instant::now() < deadline {
            if let Ok(writer) = TcpStream::connect(("127.0.0.1", options.port)) {
                let mut conn = Self::wrap(writer)?;
                loop {
                    match conn.read_line(deadline) {
                        ReadOutcome::Line(raw) => {
                            emit(&raw);
                            if control_payload(&raw).is_some_and(is_ready_payload) {
                                return Ok(conn);
                            }
                        }
                        ReadOutcome::NoData => {}
                        ReadOutcome::Disconnected => break,
                        ReadOutcome::DeadlineExceeded => {
                            return Err(ready_timeout_message(options.port))
                        }
                        ReadOutcome::Failed(error) => {
                            return Err(format!("socket read error while waiting for ready: {error}"))
                        }
                    }
                }
            }

            let backoff = retry_base
                .saturating_mul(1u64 << attempt.min(8))
                .min(MAX_RETRY_BACKOFF_MS);
            let sleep_for = Duration::from_millis(backoff);
            if Instant::now() + sleep_for >= deadline {
                break;
            }
            thread::sleep(sleep_for);
            attempt = attempt.saturating_add(1);
        }

        Err(ready_timeout_message(options.port))
    }

    fn wrap(writer: TcpStream) -> Result<Self, String> {
        writer
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(|error| format!("failed to set socket read timeout: {error}"))?;
        let reader = writer
            .try_clone()
            .map_err(|error| format!("failed to clone socket stream: {error}"))?;
        Ok(Self {
            writer,
            reader: BufReader::new(reader),
        })
    }

    fn send(&mut self, line: &str) -> Result<(), String> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        self.writer
            .write_all(&payload)
            .and_then(|()| self.writer.flush())
            .map_err(|error| format!("failed to send '{line}': {error}"))
    }

    /// Sends `sync` and waits for its acknowledgement, so every earlier
    /// command has been processed.
    fn barrier(&mut self, timeout: Duration, emit: &mut impl FnMut(&str)) -> Result<(), String> {
        self.send("sync")?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.read_line(deadline) {
                ReadOutcome::Line(raw) => {
                    emit(&raw);
                    if control_payload(&raw) == Some(SYNC_ACK) {
                        return Ok(());
                    }
                }
                ReadOutcome::NoData => {}
                ReadOutcome::Disconnected => {
                    return Err("host disconnected while waiting for barrier ack".to_string())
                }
                ReadOutcome::DeadlineExceeded => {
                    return Err(format!("timed out waiting for barrier ack ({SYNC_ACK})"))
                }
                ReadOutcome::Failed(error) => {
                    return Err(format!("socket read error while waiting for barrier ack: {error}"))
                }
            }
        }
    }

    fn drain_until_quiet(
        &mut self,
        timeout: Duration,
        emit: &mut impl FnMut(&str),
    ) -> Result<(), String> {
        let quiet = Duration::from_millis(DEFAULT_QUIET_MS);
        let deadline = Instant::now() + timeout;
        let mut last_line_at: Option<Instant> = None;
        loop {
            match self.read_line(deadline) {
                ReadOutcome::Line(raw) => {
                    emit(&raw);
                    last_line_at = Some(Instant::now());
                }
                ReadOutcome::NoData => {
                    let now = Instant::now();
                    let settled = match last_line_at {
                        Some(at) => now.saturating_duration_since(at) >= quiet,
                        None => now + quiet >= deadline,
                    };
                    if settled {
                        return Ok(());
                    }
                }
                ReadOutcome::Disconnected => {
                    return Err("host disconnected while waiting for command output".to_string())
                }
                ReadOutcome::DeadlineExceeded => return Ok(()),
                ReadOutcome::Failed(error) => {
                    return Err(format!("socket read error while waiting for output: {error}"))
                }
            }
        }
    }

    fn read_line(&mut self, deadline: Instant) -> ReadOutcome {
        if Instant::now() >= deadline {
            return ReadOutcome::DeadlineExceeded;
        }
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => ReadOutcome::Disconnected,
            Ok(_) => ReadOutcome::Line(line),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                ReadOutcome::NoData
            }
            Err(error) => ReadOutcome::Failed(error),
        }
    }
}

fn ready_timeout_message(port: u16) -> String {
    format!("timed out waiting for islandnpc ready on 127.0.0.1:{port}")
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn control_prefix_is_required() {
        assert_eq!(control_payload("C ok: sync\r\n"), Some("ok: sync"));
        assert_eq!(control_payload("ok: sync\n"), None);
        assert!(is_ready_payload("islandnpc.ready v1 port:46101"));
        assert!(!is_ready_payload("islandnpc.status v1 port:46101"));
    }

    #[test]
    fn shortcuts_expand_to_protocol_lines() {
        let invocation = parse_args(&args(&["hide", "alice"])).expect("parse");
        assert_eq!(
            invocation.request,
            Request::Send {
                line: "as alice hide".to_string()
            }
        );
        let invocation = parse_args(&args(&["--port", "5000", "fixall"])).expect("parse");
        assert_eq!(invocation.options.port, 5000);
        assert_eq!(
            invocation.request,
            Request::Send {
                line: "console fixall".to_string()
            }
        );
        assert_eq!(
            parse_args(&args(&["move"])).expect_err("player"),
            "move requires exactly one player name"
        );
    }

    #[test]
    fn flags_and_errors() {
        let invocation =
            parse_args(&args(&["--raw", "--timeout-ms", "50", "script", "a.txt", "--barrier"]))
                .expect("parse");
        assert!(invocation.options.raw);
        assert_eq!(invocation.options.timeout_ms, 50);
        assert_eq!(
            invocation.request,
            Request::Script {
                path: "a.txt".to_string(),
                barrier: true
            }
        );
        assert_eq!(
            parse_args(&args(&["--port", "x", "barrier"])).expect_err("port"),
            "invalid --port value 'x'"
        );
        assert_eq!(parse_args(&args(&[])).expect_err("empty"), "missing subcommand");
        assert_eq!(
            parse_args(&args(&["dance"])).expect_err("unknown"),
            "unknown subcommand 'dance'"
        );
    }

    #[test]
    fn script_skips_blank_and_comment_lines() {
        let content = "\n# setup\nworld load skyblock\n\n  island create alice skyblock 0 64 0  \n";
        assert_eq!(
            parse_script_lines(content),
            vec![
                "world load skyblock".to_string(),
                "island create alice skyblock 0 64 0".to_string()
            ]
        );
    }

    #[test]
    fn send_waits_for_banner_and_prints_replies() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream
                .write_all(format!("C islandnpc.ready v1 port:{port}\n").as_bytes())
                .expect("banner");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read");
            assert_eq!(line, "status\n");
            stream
                .write_all(b"C islandnpc.status v1 tick:3\nnoise\n")
                .expect("reply");
        });

        let invocation = Invocation {
            options: CtlOptions {
                port,
                timeout_ms: 2_000,
                ..CtlOptions::default()
            },
            request: Request::Send {
                line: "status".to_string(),
            },
        };
        let mut out = Vec::new();
        let result = run(invocation, &mut out);
        server.join().expect("server");
        // the server closing the socket may surface as a disconnect
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("islandnpc.ready v1"));
        assert!(text.contains("islandnpc.status v1 tick:3"));
        assert!(!text.contains("noise"));
        if let Err(error) = result {
            assert!(error.contains("disconnected"), "{error}");
        }
    }
}
