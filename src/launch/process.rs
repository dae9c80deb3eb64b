//! Child process plumbing: spawning, signalling and exit codes

use std::io;
use std::process::{ExitStatus, Stdio};

use serde::Serialize;
use tokio::process::{Child, Command};

use crate::common::{Error, Result};

/// Outcome of one launched command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcResult {
    pub pid: Option<u32>,
    /// Exit code; negative signal number when killed by a signal, `None`
    /// while still running
    pub returncode: Option<i32>,
    /// Standard output; agents run with stdout discarded, so always empty
    pub stdout: String,
    /// Captured standard error, complete once the process finished
    pub stderr: String,
}

impl ProcResult {
    pub fn is_finished(&self) -> bool {
        self.returncode.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.returncode == Some(0)
    }

    pub fn failed(&self) -> bool {
        matches!(self.returncode, Some(rc) if rc != 0)
    }
}

/// Signals the runner sends to agents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGUSR1, asks SIPp to stop its calls and exit
    Stop,
    /// SIGTERM
    Terminate,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Stop => "SIGUSR1",
            Signal::Terminate => "SIGTERM",
        }
    }

    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Stop => libc::SIGUSR1,
            Signal::Terminate => libc::SIGTERM,
        }
    }
}

/// Deliver `signal` to `pid`
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let rc = unsafe { libc::kill(pid, signal.raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not supported on this platform", signal.name()),
    ))
}

/// Exit code of a finished process, or the negated signal number
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Split a command string with shell quoting rules
pub fn split_command(cmd: &str) -> Result<Vec<String>> {
    let args = shell_words::split(cmd).map_err(|e| Error::CommandParse {
        cmd: cmd.to_string(),
        reason: e.to_string(),
    })?;
    if args.is_empty() {
        return Err(Error::EmptyCommand(cmd.to_string()));
    }
    Ok(args)
}

/// Spawn a command with stdout discarded and stderr captured
pub fn spawn(cmd: &str) -> Result<Child> {
    let args = split_command(cmd)?;
    Command::new(&args[0])
        .args(&args[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Launch {
            cmd: cmd.to_string(),
            source,
        })
}
