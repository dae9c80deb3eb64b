//! CLI command handling
//!
//! Builds scenarios from the config file plus command-line overrides and
//! formats run results.

use std::time::Duration;

use colored::Colorize;
use serde::Serialize;

use crate::commands::{Commands, ScenarioArgs};
use crate::common::config::Config;
use crate::common::{paths, Result};
use crate::hooks::{self, ScenarioConfig};
use crate::launch::{ResultMap, RunOptions, Runner};
use crate::report;
use crate::scenario::Scenario;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Cmds { scenario } => {
            let (_, scen) = build_scenario(&scenario)?;
            println!("{}", scen.pformat_cmds()?);
            Ok(())
        }

        Commands::Run {
            scenario,
            timeout,
            rate,
            no_raise,
            json,
        } => {
            let (config, scen) = build_scenario(&scenario)?;

            let mut options: RunOptions = config.run_options();
            if let Some(secs) = timeout {
                options.timeout = Duration::from_secs(secs);
            }
            if let Some(rate) = rate {
                options.rate = rate;
            }
            options.raise_exc = !no_raise;

            let mut runner = Runner::with_config(options.runner.clone());
            let outcome = scen.run_with(&mut runner, &options).await;
            print_results(&scen, &runner.results(), json)?;
            outcome.map(|_| ())
        }
    }
}

fn build_scenario(args: &ScenarioArgs) -> Result<(Config, Scenario)> {
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let mut scen_config: ScenarioConfig = config.scenario_config()?;
    scen_config.dirpath = args.dir.clone();
    scen_config.proxyaddr = args.proxy.clone();
    if args.no_autolocalsocks {
        scen_config.autolocalsocks = false;
    }
    if let Some(dir) = args.logdir.clone().or_else(|| scen_config.options.logdir.clone()) {
        scen_config.options.logdir = Some(paths::ensure_logdir(&dir)?);
    }
    if let Some(host) = &args.local_host {
        scen_config.options.defaults.set("local_host", host.as_str())?;
    }
    if let Some(count) = args.call_count {
        scen_config.options.defaults.set("call_count", count)?;
    }

    let mut scen = hooks::scenario(&scen_config)?;
    // agents carry the PATH sipp as their own value, so override per agent
    if let Some(bin) = &args.sipp {
        for agent in scen.agents_mut() {
            agent.set("bin_path", bin.as_path())?;
        }
    }
    tracing::debug!(scenario = %scen.name(), "Built scenario");
    Ok((config, scen))
}

#[derive(Serialize)]
struct AgentReport {
    name: String,
    command: String,
    pid: Option<u32>,
    returncode: Option<i32>,
    description: Option<&'static str>,
    stderr: String,
}

fn print_results(scen: &Scenario, results: &ResultMap, json: bool) -> Result<()> {
    let reports: Vec<AgentReport> = scen
        .cmditems()?
        .into_iter()
        .filter_map(|(name, command)| {
            let proc = results.get(&command)?.clone();
            Some(AgentReport {
                name,
                command,
                pid: proc.pid,
                returncode: proc.returncode,
                description: proc.returncode.map(report::exit_code_description),
                stderr: proc.stderr,
            })
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for agent in &reports {
        let status = match agent.returncode {
            Some(0) => "PASS".green().bold(),
            Some(_) => "FAIL".red().bold(),
            None => "RUNNING".yellow().bold(),
        };
        let detail = match agent.returncode {
            Some(rc) => format!("exit {} -> {}", rc, report::exit_code_description(rc)),
            None => "still running".to_string(),
        };
        println!("{} {} ({})", status, agent.name.white().bold(), detail.dimmed());
    }
    Ok(())
}
