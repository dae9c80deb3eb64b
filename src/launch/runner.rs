//! Concurrent command runner
//!
//! Launches a batch of commands at a fixed rate and supervises them until
//! they all exit. One waiter task per child reads its stderr while awaiting
//! the exit status, so no pipe can fill up and stall a child, and records the
//! exit as soon as the child is reaped.
//! The first non-zero exit broadcasts SIGUSR1 to every live process,
//! exactly once per run.

use std::collections::HashSet;
use std::fmt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinSet;

use crate::common::{Error, Result};

use super::process::{self, ProcResult, Signal};

/// Results keyed by command string, in launch order
pub type ResultMap = IndexMap<String, ProcResult>;

/// Timeout escalation settings
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Wait after the first SIGUSR1 of an escalation
    pub grace: Duration,
    /// Further SIGUSR1 attempts before giving up on a graceful stop
    pub stop_retries: u32,
    /// Wait after each retry and after the final SIGTERM
    pub retry_wait: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            stop_retries: 3,
            retry_wait: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Nothing launched, or results cleared
    Idle,
    /// At least one process has not finished
    Running,
    /// Every process finished; results await `clear`
    Completed,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Completed => write!(f, "completed"),
        }
    }
}

/// State shared between the runner and its waiter tasks
#[derive(Debug, Default)]
struct Shared {
    procs: Mutex<ResultMap>,
    /// Set once the failure broadcast happened for this run
    stopped: AtomicBool,
}

impl Shared {
    fn procs(&self) -> MutexGuard<'_, ResultMap> {
        self.procs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal every live process; returns the pids reached, by command
    fn signal_all(&self, signal: Signal) -> IndexMap<String, u32> {
        let procs = self.procs();
        let mut signalled = IndexMap::new();
        for (cmd, proc) in procs.iter().filter(|(_, p)| !p.is_finished()) {
            let Some(pid) = proc.pid else { continue };
            match process::send_signal(pid, signal) {
                Ok(()) => {
                    tracing::warn!(pid, "Sent {} to '{}'", signal.name(), cmd);
                    signalled.insert(cmd.clone(), pid);
                }
                Err(e) => {
                    tracing::debug!(pid, error = %e, "Could not signal process");
                }
            }
        }
        signalled
    }

    /// SIGUSR1 everything, unless this run already did
    fn broadcast_stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.signal_all(Signal::Stop);
        }
    }

    /// Record an exit status as soon as the child is reaped
    fn exited(&self, cmd: &str, returncode: i32) {
        if let Some(proc) = self.procs().get_mut(cmd) {
            proc.returncode = Some(returncode);
        }
    }

    fn set_stderr(&self, cmd: &str, stderr: String) {
        if let Some(proc) = self.procs().get_mut(cmd) {
            proc.stderr = stderr;
        }
    }
}

/// Next chunk of a child's stderr; 0 at EOF, pending forever once closed
async fn read_chunk(pipe: &mut Option<ChildStderr>, chunk: &mut [u8]) -> usize {
    let Some(stream) = pipe else {
        return std::future::pending().await;
    };
    match stream.read(chunk).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Failed reading agent stderr");
            0
        }
    }
}

enum ChildEvent {
    Exited(std::io::Result<ExitStatus>),
    Read(usize),
}

/// Supervise one child: stderr is read while it runs, the exit status is
/// recorded the moment it is reaped, then the rest of stderr is drained for
/// at most `drain_limit` (a descendant may hold the pipe open).
async fn wait_child(shared: Arc<Shared>, cmd: String, mut child: Child, drain_limit: Duration) {
    let mut pipe = child.stderr.take();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let status = {
        let wait = child.wait();
        tokio::pin!(wait);
        loop {
            let event = tokio::select! {
                status = &mut wait => ChildEvent::Exited(status),
                n = read_chunk(&mut pipe, &mut chunk) => ChildEvent::Read(n),
            };
            match event {
                ChildEvent::Exited(status) => break status,
                ChildEvent::Read(0) => pipe = None,
                ChildEvent::Read(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    };

    let returncode = match status {
        Ok(status) => process::exit_code(status),
        Err(e) => {
            tracing::error!(error = %e, "Failed waiting on '{}'", cmd);
            -1
        }
    };
    tracing::debug!(returncode, "'{}' exited", cmd);
    shared.exited(&cmd, returncode);

    if returncode != 0 {
        shared.broadcast_stop();
    }

    let drain = async {
        while pipe.is_some() {
            match read_chunk(&mut pipe, &mut chunk).await {
                0 => pipe = None,
                n => buf.extend_from_slice(&chunk[..n]),
            }
        }
    };
    if tokio::time::timeout(drain_limit, drain).await.is_err() {
        tracing::warn!("stderr of '{}' still open after exit, keeping partial output", cmd);
    }
    shared.set_stderr(&cmd, String::from_utf8_lossy(&buf).into_owned());
}

/// Await every waiter task, giving up after `limit`
async fn join_all(waiters: &mut JoinSet<()>, limit: Duration) -> bool {
    let drained = async {
        while let Some(joined) = waiters.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Waiter task failed");
            }
        }
    };
    tokio::time::timeout(limit, drained).await.is_ok()
}

/// Runs commands concurrently and collects their results
#[derive(Debug, Default)]
pub struct Runner {
    shared: Arc<Shared>,
    waiters: Option<JoinSet<()>>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            shared: Arc::default(),
            waiters: None,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn state(&self) -> RunnerState {
        let procs = self.shared.procs();
        if procs.is_empty() {
            RunnerState::Idle
        } else if procs.values().any(|p| !p.is_finished()) {
            RunnerState::Running
        } else {
            RunnerState::Completed
        }
    }

    /// Launch `cmds` in order, `rate` launches per second, without waiting
    /// for them to finish
    ///
    /// Results are keyed by command, so a batch repeating a command is
    /// rejected before anything is launched.
    ///
    /// If a launch fails part-way, the processes already started are sent
    /// SIGUSR1 and stay supervised by this runner; the error is returned.
    pub async fn run<I, S>(&mut self, cmds: I, rate: f64) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.state() {
            RunnerState::Running => return Err(Error::RunIncomplete),
            RunnerState::Completed => return Err(Error::ResultsNotCleared),
            RunnerState::Idle => {}
        }

        let cmds: Vec<String> = cmds.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        if let Some(dup) = cmds.iter().find(|cmd| !seen.insert(cmd.as_str())) {
            return Err(Error::DuplicateCommand(dup.clone()));
        }

        self.shared.stopped.store(false, Ordering::SeqCst);
        let interval = if rate > 0.0 {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::ZERO
        };

        let mut waiters = JoinSet::new();
        for cmd in cmds {
            let child = match process::spawn(&cmd) {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!(error = %e, "Launch failed, stopping launched agents");
                    if !waiters.is_empty() {
                        self.shared.broadcast_stop();
                        self.waiters = Some(waiters);
                    }
                    return Err(e);
                }
            };

            let pid = child.id();
            tracing::debug!(?pid, "Launched '{}'", cmd);
            self.shared.procs().insert(
                cmd.clone(),
                ProcResult {
                    pid,
                    ..Default::default()
                },
            );
            waiters.spawn(wait_child(self.shared.clone(), cmd, child, self.config.grace));

            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        self.waiters = Some(waiters);
        Ok(())
    }

    /// Launch `cmds` and wait up to `timeout` for them all to finish
    pub async fn run_to_completion<I, S>(
        &mut self,
        cmds: I,
        rate: f64,
        timeout: Duration,
    ) -> Result<ResultMap>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run(cmds, rate).await?;
        self.get(timeout).await
    }

    /// Wait up to `timeout` for every process, then return the results
    ///
    /// A zero timeout returns a snapshot without waiting. On expiry the
    /// survivors are sent SIGUSR1, given a grace period, retried, and
    /// finally sent SIGTERM. The result is a timeout error naming the
    /// signalled pids, or a supervisory error when processes outlive even
    /// SIGTERM.
    pub async fn get(&mut self, timeout: Duration) -> Result<ResultMap> {
        if let Some(mut waiters) = self.waiters.take() {
            let outcome = if timeout.is_zero() {
                Ok(())
            } else {
                self.supervise(&mut waiters, timeout).await
            };
            if !waiters.is_empty() {
                self.waiters = Some(waiters);
            }
            outcome?;
        }
        Ok(self.results())
    }

    async fn supervise(&self, waiters: &mut JoinSet<()>, timeout: Duration) -> Result<()> {
        if join_all(waiters, timeout).await {
            return Ok(());
        }
        if self.iterprocs().is_empty() {
            // every child was reaped; waiters only drain stderr, bounded by grace
            join_all(waiters, self.config.grace + self.config.retry_wait).await;
            return Ok(());
        }

        let signalled = self.stop();
        let mut done = self.settled(waiters, self.config.grace).await;
        for attempt in 0..self.config.stop_retries {
            if done {
                break;
            }
            tracing::warn!(attempt = attempt + 1, "Agents still alive, retrying stop");
            self.stop();
            done = self.settled(waiters, self.config.retry_wait).await;
        }

        if !done {
            self.terminate();
            if !self.settled(waiters, self.config.retry_wait).await {
                let alive: Vec<u32> = self.iterprocs().into_iter().map(|(_, pid)| pid).collect();
                tracing::error!(?alive, "Agents survived SIGTERM");
                return Err(Error::Supervisory(alive));
            }
        }

        Err(Error::Timeout {
            pids: signalled.values().copied().collect(),
            secs: timeout.as_secs_f64(),
        })
    }

    /// Whether every child exited within `limit`; waiters still draining
    /// stderr do not count as alive
    async fn settled(&self, waiters: &mut JoinSet<()>, limit: Duration) -> bool {
        join_all(waiters, limit).await || self.iterprocs().is_empty()
    }

    /// Send SIGUSR1 to every live process
    pub fn stop(&self) -> IndexMap<String, u32> {
        self.shared.signal_all(Signal::Stop)
    }

    /// Send SIGTERM to every live process
    pub fn terminate(&self) -> IndexMap<String, u32> {
        self.shared.signal_all(Signal::Terminate)
    }

    /// `(command, pid)` of every process still running
    pub fn iterprocs(&self) -> Vec<(String, u32)> {
        self.shared
            .procs()
            .iter()
            .filter(|(_, p)| !p.is_finished())
            .filter_map(|(cmd, p)| p.pid.map(|pid| (cmd.clone(), pid)))
            .collect()
    }

    pub fn is_alive(&self) -> bool {
        self.state() == RunnerState::Running
    }

    /// Whether every launched process has finished
    pub fn ready(&self) -> bool {
        !self.is_alive()
    }

    /// Snapshot of all results, in launch order
    pub fn results(&self) -> ResultMap {
        self.shared.procs().clone()
    }

    /// Forget the previous run's results
    pub fn clear(&mut self) -> Result<()> {
        let state = self.state();
        if state == RunnerState::Running {
            return Err(Error::invalid_state("clear results", &state.to_string()));
        }
        self.shared.procs().clear();
        self.waiters = None;
        Ok(())
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.is_alive() {
            let killed = self.terminate();
            tracing::warn!(count = killed.len(), "Runner dropped with live agents");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn quick() -> RunnerConfig {
        RunnerConfig {
            grace: Duration::from_secs(2),
            stop_retries: 1,
            retry_wait: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_results_in_launch_order() {
        let mut runner = Runner::new();
        let cmds = ["sh -c 'exit 0'", "sh -c 'echo oops >&2; exit 0'"];
        let results = runner
            .run_to_completion(cmds, 100.0, Duration::from_secs(10))
            .await
            .unwrap();

        let keys: Vec<&str> = results.keys().map(String::as_str).collect();
        assert_eq!(keys, cmds);
        assert!(results.values().all(ProcResult::succeeded));
        assert_eq!(results[cmds[1]].stderr.trim(), "oops");
        assert!(runner.ready());
    }

    #[tokio::test]
    async fn test_failure_stops_the_rest() {
        let mut runner = Runner::with_config(quick());
        let results = runner
            .run_to_completion(["sleep 30", "sh -c 'exit 3'"], 100.0, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(results["sh -c 'exit 3'"].returncode, Some(3));
        assert_eq!(results["sleep 30"].returncode, Some(-libc::SIGUSR1));
    }

    #[tokio::test]
    async fn test_timeout_signals_survivors() {
        let mut runner = Runner::with_config(quick());
        runner.run(["sleep 30"], 10.0).await.unwrap();
        let pid = runner.iterprocs()[0].1;

        let err = runner.get(Duration::from_millis(300)).await.unwrap_err();
        match err {
            Error::Timeout { pids, .. } => assert_eq!(pids, vec![pid]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runner.is_alive());
        assert_eq!(runner.results()["sleep 30"].returncode, Some(-libc::SIGUSR1));
    }

    #[tokio::test]
    async fn test_rerun_requires_clear() {
        let mut runner = Runner::with_config(quick());
        runner.run(["sleep 30"], 10.0).await.unwrap();
        assert!(matches!(runner.run(["true"], 10.0).await, Err(Error::RunIncomplete)));
        assert!(matches!(runner.clear(), Err(Error::InvalidState { .. })));

        // zero timeout is a snapshot
        let snapshot = runner.get(Duration::ZERO).await.unwrap();
        assert_eq!(snapshot["sleep 30"].returncode, None);

        runner.stop();
        runner.get(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(
            runner.run(["true"], 10.0).await,
            Err(Error::ResultsNotCleared)
        ));

        runner.clear().unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
        let results = runner
            .run_to_completion(["true"], 10.0, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_stops_launched() {
        let mut runner = Runner::with_config(quick());
        let err = runner
            .run(["sleep 30", "/definitely/not/a/binary"], 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));

        let results = runner.get(Duration::from_secs(5)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["sleep 30"].returncode, Some(-libc::SIGUSR1));
    }

    fn escalating() -> RunnerConfig {
        RunnerConfig {
            grace: Duration::from_millis(500),
            ..quick()
        }
    }

    #[tokio::test]
    async fn test_exit_recorded_while_descendant_holds_stderr() {
        let mut runner = Runner::with_config(RunnerConfig {
            grace: Duration::from_secs(1),
            ..quick()
        });
        let cmd = "sh -c 'sleep 3 & exit 0'";
        runner.run([cmd], 10.0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!runner.is_alive());
        assert!(runner.iterprocs().is_empty());
        assert!(runner.stop().is_empty());

        let results = runner.get(Duration::from_secs(3)).await.unwrap();
        assert_eq!(results[cmd].returncode, Some(0));
    }

    #[tokio::test]
    async fn test_timeout_escalates_to_sigterm() {
        let mut runner = Runner::with_config(escalating());
        let cmd = r#"sh -c 'trap "" USR1; exec sleep 30'"#;
        runner.run([cmd], 10.0).await.unwrap();
        let pid = runner.iterprocs()[0].1;

        let err = runner.get(Duration::from_millis(300)).await.unwrap_err();
        match err {
            Error::Timeout { pids, .. } => assert_eq!(pids, vec![pid]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runner.is_alive());
        assert_eq!(runner.results()[cmd].returncode, Some(-libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_supervisory_failure_when_signals_ignored() {
        let mut runner = Runner::with_config(escalating());
        let cmd = r#"sh -c 'trap "" USR1 TERM; exec sleep 30'"#;
        runner.run([cmd], 10.0).await.unwrap();
        let pid = runner.iterprocs()[0].1;

        let err = runner.get(Duration::from_millis(300)).await.unwrap_err();
        match err {
            Error::Supervisory(alive) => assert_eq!(alive, vec![pid]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.is_alive());

        unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
        let results = runner.get(Duration::from_secs(5)).await.unwrap();
        assert_eq!(results[cmd].returncode, Some(-libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_duplicate_commands_rejected() {
        let mut runner = Runner::new();
        let err = runner.run(["true", "sleep 30", "true"], 10.0).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateCommand(ref cmd) if cmd == "true"));
        assert_eq!(runner.state(), RunnerState::Idle);
        assert!(runner.results().is_empty());
    }
}
