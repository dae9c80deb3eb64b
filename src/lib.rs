//! rsipp - configure and supervise SIPp test agents
//!
//! Agents are SIPp invocations built from a declarative field table.
//! Scenarios layer default settings over a group of agents, and the runner
//! launches them concurrently, stopping the rest as soon as one fails.

pub mod agent;
pub mod cli;
pub mod command;
pub mod commands;
pub mod common;
pub mod hooks;
pub mod launch;
pub mod load;
pub mod report;
pub mod scenario;

// Re-export commonly used types
pub use agent::{client, server, ua, Settings, SocketKind, UserAgent};
pub use command::{SocketAddr, Value};
pub use common::{Error, Result};
pub use hooks::{conf_scen_protocol, scenario, walk, Hooks, ScenarioConfig};
pub use launch::{run_all_agents, Finalizer, ProcResult, ResultMap, RunOptions, Runner};
pub use scenario::{Scenario, ScenarioOptions};
