//! Agent launching
//!
//! The runner supervises plain command strings; this module binds those
//! commands back to the agents that produced them, checks the outcome and
//! reports failures.

mod process;
mod runner;

use std::time::Duration;

use indexmap::IndexMap;

use crate::agent::UserAgent;
use crate::common::{Error, Result};
use crate::report;

pub use process::{exit_code, send_signal, split_command, ProcResult, Signal};
pub use runner::{ResultMap, Runner, RunnerConfig, RunnerState};

/// How a scenario run is driven
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Deadline for every agent to finish
    pub timeout: Duration,
    /// Launches per second
    pub rate: f64,
    /// Turn agent failures into an error instead of returning the results
    pub raise_exc: bool,
    pub runner: RunnerConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            rate: 300.0,
            raise_exc: true,
            runner: RunnerConfig::default(),
        }
    }
}

/// Run prepared agents to completion on `runner` and check the outcome
pub async fn run_all_agents(
    runner: &mut Runner,
    agents: &[UserAgent],
    options: &RunOptions,
) -> Result<ResultMap> {
    let launched = Launched::start(runner, agents.to_vec(), options).await?;
    launched.finalize(runner, options.timeout).await
}

/// Agents launched on a runner, keyed by their rendered command
#[derive(Debug)]
struct Launched {
    cmds2agents: IndexMap<String, UserAgent>,
    raise_exc: bool,
}

impl Launched {
    async fn start(
        runner: &mut Runner,
        agents: Vec<UserAgent>,
        options: &RunOptions,
    ) -> Result<Self> {
        let mut cmds2agents: IndexMap<String, UserAgent> = IndexMap::with_capacity(agents.len());
        for agent in agents {
            let cmd = agent.render();
            if cmds2agents.contains_key(&cmd) {
                return Err(Error::DuplicateCommand(cmd));
            }
            cmds2agents.insert(cmd, agent);
        }
        for cmd in cmds2agents.keys() {
            tracing::debug!("Launching: {}", cmd);
        }
        runner.run(cmds2agents.keys().cloned(), options.rate).await?;
        Ok(Self {
            cmds2agents,
            raise_exc: options.raise_exc,
        })
    }

    async fn finalize(&self, runner: &mut Runner, timeout: Duration) -> Result<ResultMap> {
        let results = match runner.get(timeout).await {
            Ok(results) => results,
            Err(e) => {
                if e.is_timeout() {
                    report::emit_logfiles(&self.pairs(&runner.results()), 100);
                }
                return Err(e);
            }
        };
        check_result(&self.pairs(&results), self.raise_exc)?;
        Ok(results)
    }

    fn pairs<'a>(&'a self, results: &'a ResultMap) -> Vec<(&'a UserAgent, &'a ProcResult)> {
        self.cmds2agents
            .iter()
            .filter_map(|(cmd, agent)| results.get(cmd).map(|proc| (agent, proc)))
            .collect()
    }

    fn agents(&self) -> impl Iterator<Item = &UserAgent> {
        self.cmds2agents.values()
    }
}

/// Pending completion of a scenario launched without waiting
///
/// Owns its runner; `finalize` waits for the agents and checks the outcome.
#[derive(Debug)]
pub struct Finalizer {
    runner: Runner,
    pending: Launched,
}

impl Finalizer {
    /// Launch `agents` on `runner` and return without waiting
    pub async fn launch(
        mut runner: Runner,
        agents: Vec<UserAgent>,
        options: &RunOptions,
    ) -> Result<Self> {
        let pending = Launched::start(&mut runner, agents, options).await?;
        Ok(Self { runner, pending })
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn agents(&self) -> impl Iterator<Item = &UserAgent> {
        self.pending.agents()
    }

    /// Wait up to `timeout` for the agents; the runner is returned for
    /// post-mortem inspection alongside the outcome
    pub async fn finalize(mut self, timeout: Duration) -> (Runner, Result<ResultMap>) {
        let outcome = self.pending.finalize(&mut self.runner, timeout).await;
        (self.runner, outcome)
    }
}

/// Fail with a summary if any agent exited non-zero
///
/// Log files of failed runs are echoed first. With `raise_exc` false the
/// failure is only logged.
pub fn check_result(agents2procs: &[(&UserAgent, &ProcResult)], raise_exc: bool) -> Result<()> {
    let Some(summary) = report::err_summary(agents2procs) else {
        return Ok(());
    };

    report::emit_logfiles(agents2procs, 100);
    if raise_exc {
        return Err(Error::SippFailure(summary));
    }
    tracing::error!("{}", summary);
    Ok(())
}
