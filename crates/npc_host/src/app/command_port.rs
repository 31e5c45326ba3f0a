//! Localhost line protocol for operator tooling. Every server line carries
//! the `C ` control prefix; a ready banner is queued as soon as a client
//! connects.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use npc_engine::{COMMAND_PORT_ENV_VAR, DEFAULT_COMMAND_PORT};
use tracing::{debug, info, warn};

const MAX_PENDING_BYTES_PER_CLIENT: usize = 256 * 1024;
const CONTROL_PREFIX: &str = "C ";

#[derive(Debug)]
struct PendingChunk {
    bytes: Vec<u8>,
    written: usize,
}

#[derive(Debug)]
struct ClientConn {
    stream: TcpStream,
    read_buf: Vec<u8>,
    queued: VecDeque<PendingChunk>,
    queued_bytes: usize,
}

impl ClientConn {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
            queued: VecDeque::new(),
            queued_bytes: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CommandPort {
    listener: TcpListener,
    bound_port: u16,
    clients: Vec<ClientConn>,
}

impl CommandPort {
    pub(crate) fn bind_localhost(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(localhost_bind_addr(port))?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();
        info!(line = %ready_line_text(bound_port), "command_port_ready_bound");
        Ok(Self {
            listener,
            bound_port,
            clients: Vec::new(),
        })
    }

    pub(crate) fn bound_port(&self) -> u16 {
        self.bound_port
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Accepts new clients, reads complete lines, and pushes queued output.
    pub(crate) fn poll_lines(&mut self, out: &mut Vec<String>) {
        self.accept_pending_clients();
        self.read_client_lines(out);
        self.flush_all();
    }

    pub(crate) fn send_lines(&mut self, lines: &[String]) {
        for client in &mut self.clients {
            for line in lines {
                enqueue_line(client, line, MAX_PENDING_BYTES_PER_CLIENT);
            }
        }
        self.flush_all();
    }

    fn accept_pending_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(error = %err, "command_port_client_nonblocking_failed");
                        continue;
                    }
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(error = %err, "command_port_client_nodelay_failed");
                    }
                    let mut client = ClientConn::new(stream);
                    enqueue_line(
                        &mut client,
                        &ready_line_text(self.bound_port),
                        MAX_PENDING_BYTES_PER_CLIENT,
                    );
                    debug!(peer = %addr, "command_port_client_connected");
                    self.clients.push(client);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(error = %err, "command_port_accept_failed");
                    break;
                }
            }
        }
    }

    fn read_client_lines(&mut self, out: &mut Vec<String>) {
        self.clients.retain_mut(|client| {
            let mut chunk = [0u8; 1024];
            loop {
                match client.stream.read(&mut chunk) {
                    Ok(0) => return false,
                    Ok(bytes_read) => {
                        client.read_buf.extend_from_slice(&chunk[..bytes_read]);
                        drain_complete_lines(&mut client.read_buf, out);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return true,
                    Err(err) => {
                        warn!(error = %err, "command_port_client_read_failed");
                        return false;
                    }
                }
            }
        });
    }

    fn flush_all(&mut self) {
        self.clients.retain_mut(|client| {
            let stream = &mut client.stream;
            match flush_pending(&mut client.queued, &mut client.queued_bytes, |payload| {
                stream.write(payload)
            }) {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "command_port_client_write_failed");
                    false
                }
            }
        });
    }
}

/// Reads `ISLANDNPC_COMMAND_PORT`; bad values fall back to the default.
pub(crate) fn port_from_env() -> u16 {
    parse_port_or_default(std::env::var(COMMAND_PORT_ENV_VAR).ok().as_deref())
}

fn parse_port_or_default(raw: Option<&str>) -> u16 {
    match raw {
        Some(value) => value.trim().parse::<u16>().unwrap_or_else(|_| {
            warn!(
                value,
                fallback_port = DEFAULT_COMMAND_PORT,
                "command_port_invalid_port_using_default"
            );
            DEFAULT_COMMAND_PORT
        }),
        None => DEFAULT_COMMAND_PORT,
    }
}

fn localhost_bind_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub(crate) fn ready_line_text(port: u16) -> String {
    format!("islandnpc.ready v1 port:{port}")
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop();
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }
        match String::from_utf8(line_bytes) {
            Ok(line) => out.push(line),
            Err(err) => warn!(error = %err, "command_port_invalid_utf8_line_dropped"),
        }
    }
}

fn encode_control_payload(line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(CONTROL_PREFIX.len() + line.len() + 1);
    payload.extend_from_slice(CONTROL_PREFIX.as_bytes());
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}

/// Oldest untouched chunks are evicted to stay under `cap`; a chunk that is
/// partly written is never evicted.
fn enqueue_line(client: &mut ClientConn, line: &str, cap: usize) {
    let bytes = encode_control_payload(line);
    if bytes.len() > cap {
        warn!(chunk_bytes = bytes.len(), cap, "command_port_line_over_cap_dropped");
        return;
    }
    while client.queued_bytes + bytes.len() > cap {
        let evict_at = match client.queued.front() {
            Some(front) if front.written > 0 => 1,
            _ => 0,
        };
        let Some(evicted) = client.queued.remove(evict_at) else {
            break;
        };
        client.queued_bytes = client.queued_bytes.saturating_sub(evicted.bytes.len());
        debug!(evicted_bytes = evicted.bytes.len(), "command_port_evicted_oldest_line");
    }
    client.queued_bytes += bytes.len();
    client.queued.push_back(PendingChunk { bytes, written: 0 });
}

fn flush_pending<F>(
    queued: &mut VecDeque<PendingChunk>,
    queued_bytes: &mut usize,
    mut write_payload: F,
) -> io::Result<()>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    while let Some(front) = queued.front_mut() {
        match write_payload(&front.bytes[front.written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "command_port_write_zero",
                ))
            }
            Ok(bytes_written) => {
                front.written += bytes_written;
                if front.written >= front.bytes.len() {
                    *queued_bytes = queued_bytes.saturating_sub(front.bytes.len());
                    queued.pop_front();
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
