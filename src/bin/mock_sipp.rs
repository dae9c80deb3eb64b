//! Mock SIPp binary for integration testing
//!
//! Accepts the command line rsipp renders and plays a trivial call flow over
//! UDP so runs can be tested without a real SIPp:
//!
//! - with a remote `host:port` argument it acts as a client, sending one
//!   `INVITE <n>` per call (retransmitted until answered) and waiting up to
//!   `-recv_timeout` ms for each `200 OK <n>`;
//! - otherwise it acts as a server on `-i`/`-p` (default port 5060),
//!   answering until `-m` distinct calls were seen.
//!
//! Exit codes follow SIPp: 0 all calls succeeded, 1 a call failed, 255 bad
//! arguments or an unusable socket. SIGUSR1 keeps its default action.

use std::collections::HashSet;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::process::exit;
use std::time::{Duration, Instant};

/// Flags that take no value
const BARE_FLAGS: &[&str] = &[
    "-rtp_echo",
    "-timeout_error",
    "-aa",
    "-trace_err",
    "-trace_calldebug",
    "-trace_error_codes",
    "-trace_msg",
    "-trace_logs",
    "-trace_screen",
    "-error_overwrite",
];

/// Flags that take a key and a value
const PAIR_FLAGS: &[&str] = &["-key", "-set"];

const RETRANSMIT: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct Options {
    local_host: Option<String>,
    local_port: Option<u16>,
    call_count: u32,
    recv_timeout: Duration,
    screen_file: Option<String>,
    remote: Option<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        call_count: 1,
        recv_timeout: Duration::from_millis(5000),
        ..Default::default()
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if !arg.starts_with('-') {
            opts.remote = Some(arg.clone());
            continue;
        }
        if BARE_FLAGS.contains(&arg.as_str()) {
            continue;
        }
        if PAIR_FLAGS.contains(&arg.as_str()) {
            iter.next();
            iter.next();
            continue;
        }

        let value = iter
            .next()
            .ok_or_else(|| format!("Missing value for {}", arg))?;
        match arg.as_str() {
            "-i" => opts.local_host = Some(value.clone()),
            "-p" => {
                opts.local_port = Some(value.parse().map_err(|_| format!("Bad port '{}'", value))?)
            }
            "-m" => {
                opts.call_count = value.parse().map_err(|_| format!("Bad call count '{}'", value))?
            }
            "-recv_timeout" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| format!("Bad recv_timeout '{}'", value))?;
                opts.recv_timeout = Duration::from_millis(ms);
            }
            "-screen_file" => opts.screen_file = Some(value.clone()),
            _ => {}
        }
    }
    Ok(opts)
}

fn resolve(addr: &str) -> Result<SocketAddr, String> {
    addr.to_socket_addrs()
        .map_err(|e| format!("Cannot resolve '{}': {}", addr, e))?
        .next()
        .ok_or_else(|| format!("No address for '{}'", addr))
}

fn bind(opts: &Options, default_port: u16) -> Result<UdpSocket, String> {
    let host = opts.local_host.as_deref().unwrap_or("0.0.0.0");
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = opts.local_port.unwrap_or(default_port);
    let addr = resolve(&format!("{}:{}", host, port))
        .or_else(|_| resolve(&format!("[{}]:{}", host, port)))?;
    UdpSocket::bind(addr).map_err(|e| format!("Unable to bind UDP socket {}: {}", addr, e))
}

fn write_screen(opts: &Options, ok: u32, failed: u32) {
    if let Some(path) = &opts.screen_file {
        let body = format!("Successful call: {}\nFailed call: {}\n", ok, failed);
        if let Err(e) = std::fs::write(path, body) {
            eprintln!("Could not write screen file {}: {}", path, e);
        }
    }
}

fn run_server(opts: &Options) -> Result<i32, String> {
    let socket = bind(opts, 5060)?;
    let mut seen = HashSet::new();
    let mut buf = [0u8; 1500];

    while (seen.len() as u32) < opts.call_count {
        let (len, peer) = socket
            .recv_from(&mut buf)
            .map_err(|e| format!("recv failed: {}", e))?;
        let msg = String::from_utf8_lossy(&buf[..len]);
        let Some(call) = msg.strip_prefix("INVITE ") else {
            continue;
        };
        let call = call.trim().to_string();
        let reply = format!("200 OK {}", call);
        if let Err(e) = socket.send_to(reply.as_bytes(), peer) {
            eprintln!("reply to {} failed: {}", peer, e);
        }
        seen.insert(call);
    }

    write_screen(opts, opts.call_count, 0);
    Ok(0)
}

fn place_call(socket: &UdpSocket, remote: SocketAddr, call: u32, timeout: Duration) -> bool {
    let invite = format!("INVITE {}", call);
    let expected = format!("200 OK {}", call);
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1500];

    while Instant::now() < deadline {
        if let Err(e) = socket.send_to(invite.as_bytes(), remote) {
            eprintln!("send to {} failed: {}", remote, e);
        }
        let wait = RETRANSMIT.min(deadline.saturating_duration_since(Instant::now()));
        if wait.is_zero() || socket.set_read_timeout(Some(wait)).is_err() {
            break;
        }
        while let Ok((len, _)) = socket.recv_from(&mut buf) {
            if String::from_utf8_lossy(&buf[..len]).trim() == expected {
                return true;
            }
        }
    }
    false
}

fn run_client(opts: &Options, remote: &str) -> Result<i32, String> {
    let remote = resolve(remote)?;
    let socket = bind(opts, 0)?;

    let mut failed = 0;
    for call in 0..opts.call_count {
        if !place_call(&socket, remote, call, opts.recv_timeout) {
            eprintln!("call {} to {} timed out", call, remote);
            failed += 1;
        }
    }

    write_screen(opts, opts.call_count - failed, failed);
    Ok(if failed == 0 { 0 } else { 1 })
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = parse_args(&args).and_then(|opts| match opts.remote.clone() {
        Some(remote) => run_client(&opts, &remote),
        None => run_server(&opts),
    });

    match outcome {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("{}", e);
            exit(255);
        }
    }
}
