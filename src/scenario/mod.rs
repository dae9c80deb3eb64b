//! Scenarios
//!
//! A [`Scenario`] groups agents in launch order with three layers of default
//! settings: global, client-role and server-role. Preparing an agent merges
//! those layers under the agent's own settings and returns a fresh copy; the
//! layers themselves are only read.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::agent::{Settings, SocketKind, UserAgent, LOGDIR_KEY};
use crate::command::{SocketAddr, Value};
use crate::common::{paths, Result};
use crate::hooks::Hooks;
use crate::launch::{Finalizer, ResultMap, RunOptions, Runner};

/// Defaults applied to every agent
pub fn global_defaults() -> Settings {
    let mut defaults = role_defaults();
    defaults.insert_unchecked("recv_timeout", Value::Int(5000));
    defaults.insert_unchecked("call_count", Value::Int(1));
    defaults.insert_unchecked("rate", Value::Int(1));
    defaults.insert_unchecked("limit", Value::Int(1));
    defaults.insert_unchecked(LOGDIR_KEY, Value::from(paths::default_logdir()));
    defaults
}

/// Starting point of the client and server layers
pub fn role_defaults() -> Settings {
    let mut defaults = Settings::new();
    defaults.insert_unchecked("key_vals", Value::Map(IndexMap::new()));
    defaults.insert_unchecked("global_vars", Value::Map(IndexMap::new()));
    defaults
}

/// Construction options for a [`Scenario`]
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    /// Overlaid onto [`global_defaults`]
    pub defaults: Settings,
    /// Client layer; starts from [`role_defaults`] when unset
    pub client_defaults: Option<Settings>,
    /// Server layer; starts from [`role_defaults`] when unset
    pub server_defaults: Option<Settings>,
    /// Log directory for every agent
    pub logdir: Option<PathBuf>,
}

/// An ordered group of agents plus layered default configuration
#[derive(Clone)]
pub struct Scenario {
    agents: Vec<UserAgent>,
    defaults: Settings,
    client_defaults: Settings,
    server_defaults: Settings,
    hooks: Vec<Arc<dyn Hooks>>,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("agents", &self.agents)
            .field("defaults", &self.defaults)
            .field("client_defaults", &self.client_defaults)
            .field("server_defaults", &self.server_defaults)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Scenario {
    /// Create a scenario with stock default layers; `agents` is launch order
    pub fn new(agents: Vec<UserAgent>) -> Self {
        Self {
            agents,
            defaults: global_defaults(),
            client_defaults: role_defaults(),
            server_defaults: role_defaults(),
            hooks: Vec::new(),
        }
    }

    pub fn with_options(agents: Vec<UserAgent>, options: ScenarioOptions) -> Result<Self> {
        let mut defaults = Settings::merge(&[&global_defaults(), &options.defaults]);
        if let Some(dir) = &options.logdir {
            defaults.set(LOGDIR_KEY, dir.as_path())?;
        }

        let layer = |given: Option<Settings>| match given {
            Some(s) => Settings::merge(&[&role_defaults(), &s]),
            None => role_defaults(),
        };

        Ok(Self {
            agents,
            defaults,
            client_defaults: layer(options.client_defaults),
            server_defaults: layer(options.server_defaults),
            hooks: Vec::new(),
        })
    }

    /// Attach the hooks consulted while preparing agents
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn Hooks>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks(&self) -> &[Arc<dyn Hooks>] {
        &self.hooks
    }

    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    pub fn defaults_mut(&mut self) -> &mut Settings {
        &mut self.defaults
    }

    pub fn client_defaults(&self) -> &Settings {
        &self.client_defaults
    }

    pub fn client_defaults_mut(&mut self) -> &mut Settings {
        &mut self.client_defaults
    }

    pub fn server_defaults(&self) -> &Settings {
        &self.server_defaults
    }

    pub fn server_defaults_mut(&mut self) -> &mut Settings {
        &mut self.server_defaults
    }

    /// Agents in launch order
    pub fn agent_list(&self) -> &[UserAgent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [UserAgent] {
        &mut self.agents
    }

    /// First agent with the given name
    pub fn agent_mut(&mut self, name: &str) -> Option<&mut UserAgent> {
        self.agents.iter_mut().find(|a| a.name() == name)
    }

    /// Agents keyed by name, in launch order
    pub fn agents(&self) -> IndexMap<String, &UserAgent> {
        self.agents.iter().map(|a| (a.name(), a)).collect()
    }

    pub fn clients(&self) -> IndexMap<String, &UserAgent> {
        self.agents
            .iter()
            .filter(|a| a.is_client())
            .map(|a| (a.name(), a))
            .collect()
    }

    pub fn servers(&self) -> IndexMap<String, &UserAgent> {
        self.agents
            .iter()
            .filter(|a| a.is_server())
            .map(|a| (a.name(), a))
            .collect()
    }

    /// Name built from the script directories, or scenario names, of the
    /// agents; joined with `_` when they differ
    pub fn name(&self) -> String {
        let dirnames: Vec<String> = self
            .agents
            .iter()
            .map(|agent| match agent.get_str("scen_file") {
                Some(file) => Path::new(&file)
                    .parent()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                None => agent.get_str("scen_name").unwrap_or_default(),
            })
            .collect();

        let unique: HashSet<&String> = dirnames.iter().collect();
        if unique.len() > 1 {
            return dirnames.join("_");
        }
        dirnames.into_iter().next().unwrap_or_default()
    }

    /// Return a new agent with every default layer applied
    ///
    /// Precedence, low to high: global defaults, the role layer, the
    /// agent's own truthy fields. Log files and trace flags are filled in
    /// afterwards.
    pub fn prepare_agent(&self, agent: &UserAgent) -> Result<UserAgent> {
        let empty = Settings::new();
        let (secondary, layer_name) = if agent.is_client() {
            (&self.client_defaults, "client_defaults")
        } else if agent.is_server() {
            (&self.server_defaults, "server_defaults")
        } else {
            (&empty, "unspecialized ua")
        };

        let mut source = agent.clone();
        for hook in &self.hooks {
            hook.pre_ua_defaults(&mut source)?;
        }

        let own = source.todict();
        tracing::trace!(defaults = ?self.defaults, "'defaults' contents");
        tracing::trace!(layer = layer_name, contents = ?secondary, "role layer contents");
        tracing::trace!(contents = ?own, "agent contents");

        let params = Settings::merge(&[&self.defaults, secondary, &own]);
        tracing::debug!(agent = %source.name(), merged = ?params, "Merged agent settings");

        let mut prepared = UserAgent::from_settings(&params)?;
        prepared.enable_logging(None)?;

        for hook in &self.hooks {
            hook.post_ua_defaults(&mut prepared)?;
        }

        Ok(prepared)
    }

    /// Prepared copies of every agent, in launch order
    pub fn prepare(&self) -> Result<Vec<UserAgent>> {
        self.prepare_agents(&self.agents)
    }

    pub fn prepare_agents(&self, agents: &[UserAgent]) -> Result<Vec<UserAgent>> {
        agents.iter().map(|a| self.prepare_agent(a)).collect()
    }

    /// New scenario made of prepared agents, keeping the global layer
    pub fn from_agents(&self) -> Result<Scenario> {
        Ok(Scenario {
            agents: self.prepare()?,
            defaults: self.defaults.clone(),
            client_defaults: role_defaults(),
            server_defaults: role_defaults(),
            hooks: self.hooks.clone(),
        })
    }

    /// First prepared agent whose `kind` socket equals `addr`
    pub fn findbyaddr(&self, addr: &SocketAddr, kind: SocketKind) -> Result<Option<UserAgent>> {
        Ok(self
            .prepare()?
            .into_iter()
            .find(|agent| agent.sockaddr(kind).as_ref() == Some(addr)))
    }

    /// Whether any agent's script plays media
    pub fn has_media(&self) -> bool {
        self.agents.iter().any(UserAgent::plays_media)
    }

    /// Directory holding the scenario scripts, if agents use script files
    pub fn dirpath(&self) -> Result<Option<PathBuf>> {
        let prepared = self.prepare()?;
        Ok(prepared
            .first()
            .and_then(|a| a.get_str("scen_file"))
            .and_then(|f| Path::new(&f).parent().map(Path::to_path_buf)))
    }

    /// `(agent name, command)` pairs of the prepared agents
    pub fn cmditems(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .prepare()?
            .iter()
            .map(|a| (a.name(), a.render()))
            .collect())
    }

    /// Commands formatted for printing
    pub fn pformat_cmds(&self) -> Result<String> {
        Ok(self
            .cmditems()?
            .iter()
            .map(|(name, cmd)| format!("{}:\n{}", name, cmd))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Run every agent to completion on a fresh runner
    pub async fn run(&self, options: &RunOptions) -> Result<ResultMap> {
        let mut runner = Runner::with_config(options.runner.clone());
        self.run_with(&mut runner, options).await
    }

    /// Run every agent on `runner`, keeping it for post-mortem inspection
    pub async fn run_with(&self, runner: &mut Runner, options: &RunOptions) -> Result<ResultMap> {
        let agents = self.prepare()?;
        tracing::info!(scenario = %self.name(), agents = agents.len(), "Running scenario");
        crate::launch::run_all_agents(runner, &agents, options).await
    }

    /// Launch every agent and return without waiting
    pub async fn launch(&self, options: &RunOptions) -> Result<Finalizer> {
        let agents = self.prepare()?;
        tracing::info!(scenario = %self.name(), agents = agents.len(), "Launching scenario");
        Finalizer::launch(Runner::with_config(options.runner.clone()), agents, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{client, server};
    use crate::common::Error;

    fn uas_uac() -> (UserAgent, UserAgent) {
        (server(Settings::new()).unwrap(), client(Settings::new()).unwrap())
    }

    #[test]
    fn test_scenario_views_and_name() {
        let (uas, uac) = uas_uac();
        let scen = Scenario::new(vec![uas.clone(), uac.clone()]);

        let agents: Vec<_> = scen.agents().into_values().cloned().collect();
        assert_eq!(agents, vec![uas.clone(), uac.clone()]);
        assert_eq!(scen.servers().values().next().copied(), Some(&uas));
        assert_eq!(scen.clients().values().next().copied(), Some(&uac));
        assert_eq!(scen.name(), "uas_uac");

        // prepared agents are new copies
        assert_ne!(scen.prepare().unwrap(), vec![uas, uac]);
    }

    #[test]
    fn test_defaults_apply_to_all_agents() {
        let (uas, uac) = uas_uac();
        let mut scen = Scenario::new(vec![uas.clone(), uac.clone()]);
        let scen2 = Scenario::new(vec![uas, uac]);

        scen.defaults_mut().set("local_host", "doggy").unwrap();
        let prepared = scen.prepare().unwrap();
        assert_eq!(prepared[0].get_str("local_host").as_deref(), Some("doggy"));
        assert_eq!(prepared[1].get_str("local_host").as_deref(), Some("doggy"));

        // no shared state between instances
        assert!(scen2.defaults().get("local_host").is_none());

        assert!(matches!(
            scen.defaults_mut().set("local_man", "flasher"),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_role_layer_applies_to_role_only() {
        let (uas, uac) = uas_uac();
        let mut scen = Scenario::new(vec![uas, uac]);
        scen.server_defaults_mut().set("uri_username", "doggy").unwrap();

        let prepared = scen.prepare().unwrap();
        assert_eq!(prepared[0].get_str("uri_username").as_deref(), Some("doggy"));
        assert_eq!(prepared[1].get_str("uri_username"), None);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let (uas, uac) = uas_uac();
        let mut scen = Scenario::new(vec![uas, uac]);
        scen.client_defaults_mut()
            .set("destaddr", SocketAddr::new("10.0.0.5", 5060))
            .unwrap();

        let defaults_before = scen.defaults().clone();
        let first = scen.prepare().unwrap();
        let second = scen.prepare().unwrap();
        assert_eq!(first, second);
        assert_eq!(scen.defaults(), &defaults_before);

        // preparing prepared agents changes nothing either
        let again = scen.prepare_agents(&first).unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn test_explicit_agent_value_wins() {
        let uas = server(Settings::new()).unwrap();
        let mut uac = client(Settings::new()).unwrap();
        uac.set("remote_port", 5090).unwrap();
        uac.set("recv_timeout", 1).unwrap();

        let mut scen = Scenario::new(vec![uas, uac]);
        scen.client_defaults_mut()
            .set("destaddr", SocketAddr::new("10.10.99.99", 5060))
            .unwrap();
        scen.defaults_mut().set("recv_timeout", 9000).unwrap();

        let prepared = scen.prepare().unwrap();
        let uac = &prepared[1];
        assert_eq!(uac.get_int("remote_port"), Some(5090));
        assert_eq!(uac.get_str("remote_host").as_deref(), Some("10.10.99.99"));
        assert_eq!(uac.get_int("recv_timeout"), Some(1));
        assert_eq!(prepared[0].get_int("recv_timeout"), Some(9000));
    }

    #[test]
    fn test_nested_maps_merge_one_level() {
        let mut uac = client(Settings::new()).unwrap();
        uac.map_mut("key_vals")
            .unwrap()
            .insert("agent".into(), "1".into());

        let mut scen = Scenario::new(vec![uac]);
        scen.defaults_mut()
            .set("key_vals", Value::map([("global", 1)]))
            .unwrap();
        scen.client_defaults_mut()
            .set("key_vals", Value::map([("client", 1)]))
            .unwrap();

        let prepared = scen.prepare().unwrap();
        let cmd = prepared[0].render();
        assert!(cmd.contains("-key global '1' -key client '1' -key agent '1' "));
    }

    #[test]
    fn test_logdir_applies_to_log_files() {
        let logdir = std::env::temp_dir().join("rsipp-scenario-logdir");
        std::fs::create_dir_all(&logdir).unwrap();
        let (uas, uac) = uas_uac();
        let scen = Scenario::with_options(
            vec![uas, uac],
            ScenarioOptions {
                logdir: Some(logdir.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        for agent in scen.prepare().unwrap() {
            let name = agent.name();
            for (_, path) in agent.iter_logfile_items() {
                let path = path.unwrap();
                assert!(path.starts_with(&*logdir.to_string_lossy()));
                assert!(path.contains(&name));
            }
            let cmd = agent.render();
            let logs = cmd
                .split_whitespace()
                .filter(|t| t.contains(&*logdir.to_string_lossy()))
                .count();
            assert_eq!(logs, crate::agent::LOG_TYPES.len());
        }
        // only prepared copies carry the logdir
        assert!(scen.agent_list()[1].logdir().is_none());
    }

    #[test]
    fn test_findbyaddr() {
        let mut uas = server(Settings::new()).unwrap();
        uas.set_sockaddr(SocketKind::Src, Some(SocketAddr::new("127.0.0.1", 5070)))
            .unwrap();
        let scen = Scenario::new(vec![uas, client(Settings::new()).unwrap()]);

        let found = scen
            .findbyaddr(&SocketAddr::new("127.0.0.1", 5070), SocketKind::Src)
            .unwrap()
            .unwrap();
        assert!(found.is_server());
        assert!(scen
            .findbyaddr(&SocketAddr::new("127.0.0.1", 5070), SocketKind::Media)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_from_agents_and_pformat() {
        let (uas, uac) = uas_uac();
        let scen = Scenario::new(vec![uas, uac]);
        let prepared = scen.from_agents().unwrap();
        assert_eq!(prepared.agent_list(), scen.prepare().unwrap().as_slice());

        let text = scen.pformat_cmds().unwrap();
        assert!(text.starts_with("uas:\n"));
        assert!(text.contains("\n\nuac:\n"));
        assert!(scen.dirpath().unwrap().is_none());
    }
}
