//! Scenario configuration hooks
//!
//! Callers customise how scenarios are assembled by passing [`Hooks`]
//! implementations explicitly. Every method has a no-op default. The
//! built-in rules, automatic local sockets and default routing, are hooks
//! too and run around the caller's.

use std::net::{ToSocketAddrs, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{client, server, Settings, SocketKind, UserAgent};
use crate::command::SocketAddr;
use crate::common::{Error, Result};
use crate::load;
use crate::scenario::{Scenario, ScenarioOptions};

/// Extension points consulted while a scenario is assembled
pub trait Hooks: Send + Sync {
    /// Adjust a scratch copy of an agent before defaults are merged into it
    fn pre_ua_defaults(&self, _agent: &mut UserAgent) -> Result<()> {
        Ok(())
    }

    /// Adjust a prepared agent
    fn post_ua_defaults(&self, _agent: &mut UserAgent) -> Result<()> {
        Ok(())
    }

    /// Whether a script directory should be collected
    fn load_scendir(&self, _path: &Path, _xmls: &[PathBuf]) -> Option<bool> {
        None
    }

    /// Launch order; the first hook returning `Some` decides
    fn order_agents(&self, _agents: &[UserAgent]) -> Option<Vec<UserAgent>> {
        None
    }

    /// Configure an assembled scenario
    fn conf_scen(&self, _scen: &mut Scenario) -> Result<()> {
        Ok(())
    }
}

/// Servers sorted by name, then clients sorted by name, then the rest
pub fn default_order(agents: &[UserAgent]) -> Vec<UserAgent> {
    let mut servers: Vec<&UserAgent> = agents.iter().filter(|a| a.is_server()).collect();
    servers.sort_by_key(|a| a.name());
    let mut clients: Vec<&UserAgent> = agents
        .iter()
        .filter(|a| a.is_client() && !a.is_server())
        .collect();
    clients.sort_by_key(|a| a.name());
    let others = agents.iter().filter(|a| !a.is_client() && !a.is_server());

    servers.into_iter().chain(clients).chain(others).cloned().collect()
}

/// Point clients at the first server and make non-playing agents echo media
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRouting;

impl Hooks for DefaultRouting {
    fn conf_scen(&self, scen: &mut Scenario) -> Result<()> {
        let first_server = scen.agent_list().iter().find(|a| a.is_server()).cloned();

        if let Some(uas) = first_server {
            let servers_addr = scen
                .server_defaults()
                .sockaddr(SocketKind::Src)
                .unwrap_or_else(|| SocketAddr::new("127.0.0.1", 5060));
            let uas = scen.prepare_agent(&uas)?;
            let dest = uas.srcaddr().unwrap_or(servers_addr);
            tracing::debug!(%dest, "Routing clients to '{}'", uas.name());
            scen.client_defaults_mut()
                .setdefault(SocketKind::Dest.key(), dest)?;
        } else if !scen.client_defaults().contains(SocketKind::Proxy.key()) {
            // no servers, so requests go out through the remote socket
            if let Some(dest) = scen.client_defaults().sockaddr(SocketKind::Dest) {
                scen.client_defaults_mut()
                    .set_sockaddr(SocketKind::Proxy, dest)?;
            }
        }

        if scen.has_media() && scen.agent_list().len() == 2 {
            for agent in scen.agents_mut() {
                if !agent.plays_media() {
                    agent.set("rtp_echo", true)?;
                }
            }
        }
        Ok(())
    }
}

/// Give every agent OS-allocated local signalling and media sockets
///
/// Only fields the prepared agent still lacks are filled in. The sockets
/// are released right after allocation, so another process may grab the
/// port before SIPp binds it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoLocalSockets;

impl Hooks for AutoLocalSockets {
    fn conf_scen(&self, scen: &mut Scenario) -> Result<()> {
        let host = match scen.defaults().get("local_host").and_then(|v| v.as_scalar()) {
            Some(host) => host,
            None => local_hostname()?,
        };

        for index in 0..scen.agent_list().len() {
            let copy = scen.prepare_agent(&scen.agent_list()[index])?;
            let agent_host = scen.agent_list()[index].get_str("local_host");
            let sock = getsockaddr(agent_host.as_deref().unwrap_or(&host))?;

            let agent = &mut scen.agents_mut()[index];
            if !copy.is_set("local_host") {
                agent.set("local_host", sock.host.as_str())?;
            }
            if !copy.is_set("local_port") {
                agent.set("local_port", sock.port)?;
            }
            if !copy.is_set("media_addr") {
                let local = agent
                    .get_str("local_host")
                    .or_else(|| copy.get_str("local_host"))
                    .unwrap_or_else(|| host.clone());
                agent.set("media_addr", local)?;
            }
            if !copy.is_set("media_port") {
                let media_host = agent.get_str("media_addr").unwrap_or_else(|| host.clone());
                agent.set("media_port", getsockaddr(&media_host)?.port)?;
            }
            tracing::debug!(
                srcaddr = ?agent.srcaddr(),
                mediaaddr = ?agent.mediaaddr(),
                "Allocated sockets for '{}'",
                agent.name()
            );
        }
        Ok(())
    }
}

/// Bind a UDP socket on `host` with port 0 and return the address the OS
/// assigned
pub fn getsockaddr(host: &str) -> Result<SocketAddr> {
    let candidate = (host, 0)
        .to_socket_addrs()?
        .find(std::net::SocketAddr::is_ipv4)
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("getaddrinfo returned empty sequence for '{}'", host),
            ))
        })?;
    let socket = UdpSocket::bind(candidate)?;
    Ok(socket.local_addr()?.into())
}

fn local_hostname() -> Result<String> {
    hostname::get()?
        .into_string()
        .map_err(|_| Error::Internal("hostname is not valid UTF-8".to_string()))
}

/// How scenarios are assembled
#[derive(Clone)]
pub struct ScenarioConfig {
    /// Load agents from this script directory instead of the default
    /// `uas` and `uac` pair
    pub dirpath: Option<PathBuf>,
    /// Applied to the client layer
    pub proxyaddr: Option<SocketAddr>,
    pub autolocalsocks: bool,
    pub options: ScenarioOptions,
    /// Caller hooks, consulted in order
    pub hooks: Vec<Arc<dyn Hooks>>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            dirpath: None,
            proxyaddr: None,
            autolocalsocks: true,
            options: ScenarioOptions::default(),
            hooks: Vec::new(),
        }
    }
}

/// Order `agents`, build the scenario and run every `conf_scen` hook
///
/// Order of configuration: automatic local sockets (when enabled), the
/// caller's hooks, default routing.
pub fn conf_scen_protocol(agents: Vec<UserAgent>, config: &ScenarioConfig) -> Result<Scenario> {
    let ordered = config
        .hooks
        .iter()
        .find_map(|h| h.order_agents(&agents))
        .unwrap_or_else(|| default_order(&agents));
    let agents = if ordered.is_empty() { agents } else { ordered };

    let mut scen = Scenario::with_options(agents, config.options.clone())?
        .with_hooks(config.hooks.clone());

    let mut chain: Vec<Arc<dyn Hooks>> = Vec::with_capacity(config.hooks.len() + 2);
    if config.autolocalsocks {
        chain.push(Arc::new(AutoLocalSockets));
    }
    chain.extend(config.hooks.iter().cloned());
    chain.push(Arc::new(DefaultRouting));

    for hook in &chain {
        hook.conf_scen(&mut scen)?;
    }
    Ok(scen)
}

/// One configured scenario per script directory under `root`
pub fn walk(root: &Path, config: &ScenarioConfig) -> Result<Vec<(PathBuf, Scenario)>> {
    let mut scenarios = Vec::new();
    for dir in load::iter_scen_dirs(root)? {
        let keep = config
            .hooks
            .iter()
            .filter_map(|h| h.load_scendir(&dir.path, &dir.xmls))
            .all(|keep| keep);
        if !keep {
            tracing::debug!("Skipping scenario directory '{}'", dir.path.display());
            continue;
        }

        let agents = load::agents_for_scripts(&dir.xmls)?;
        let scen = conf_scen_protocol(agents, config)?;
        scenarios.push((dir.path, scen));
    }
    Ok(scenarios)
}

/// A single configured scenario
///
/// Loads the first script directory under `dirpath` when given, otherwise
/// builds the default `uas` + `uac` call flow.
pub fn scenario(config: &ScenarioConfig) -> Result<Scenario> {
    let mut scen = match &config.dirpath {
        Some(dir) => walk(dir, config)?
            .into_iter()
            .next()
            .map(|(_, scen)| scen)
            .ok_or_else(|| {
                Error::Config(format!("No SIPp scripts found under {}", dir.display()))
            })?,
        None => {
            let agents = vec![server(Settings::new())?, client(Settings::new())?];
            conf_scen_protocol(agents, config)?
        }
    };

    if let Some(proxy) = &config.proxyaddr {
        scen.client_defaults_mut()
            .set_sockaddr(SocketKind::Proxy, proxy.clone())?;
    }
    Ok(scen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Value;

    fn loopback() -> ScenarioConfig {
        let mut options = ScenarioOptions::default();
        options.defaults.set("local_host", "127.0.0.1").unwrap();
        ScenarioConfig {
            options,
            ..Default::default()
        }
    }

    #[test]
    fn test_servers_launch_first() {
        let uac = client(Settings::new()).unwrap();
        let uas = server(Settings::new()).unwrap();
        let config = ScenarioConfig {
            autolocalsocks: false,
            ..Default::default()
        };
        let scen = conf_scen_protocol(vec![uac, uas], &config).unwrap();
        let names: Vec<String> = scen.agent_list().iter().map(UserAgent::name).collect();
        assert_eq!(names, ["uas", "uac"]);
    }

    #[test]
    fn test_default_routing_without_sockets() {
        let config = ScenarioConfig {
            autolocalsocks: false,
            ..Default::default()
        };
        let scen = scenario(&config).unwrap();
        assert_eq!(
            scen.client_defaults().sockaddr(SocketKind::Dest),
            Some(SocketAddr::new("127.0.0.1", 5060))
        );
        let prepared = scen.prepare().unwrap();
        assert!(prepared[1].render().contains("'127.0.0.1':'5060'"));
    }

    #[test]
    fn test_auto_local_sockets() {
        let scen = scenario(&loopback()).unwrap();
        let prepared = scen.prepare().unwrap();
        let (uas, uac) = (&prepared[0], &prepared[1]);

        let srcaddr = uas.srcaddr().unwrap();
        assert_eq!(srcaddr.host, "127.0.0.1");
        assert_ne!(srcaddr.port, 0);
        assert!(uas.mediaaddr().is_some());
        assert_eq!(uac.destaddr(), Some(srcaddr));
    }

    #[test]
    fn test_no_servers_routes_through_proxy() {
        let mut uac = client(Settings::new()).unwrap();
        uac.set("call_count", 2).unwrap();
        let mut options = ScenarioOptions::default();
        options.client_defaults = Some(
            Settings::from_pairs([("destaddr", Value::from(("10.0.0.9", 5060)))]).unwrap(),
        );
        let config = ScenarioConfig {
            autolocalsocks: false,
            options,
            ..Default::default()
        };

        let scen = conf_scen_protocol(vec![uac], &config).unwrap();
        assert_eq!(
            scen.client_defaults().sockaddr(SocketKind::Proxy),
            Some(SocketAddr::new("10.0.0.9", 5060))
        );
    }

    #[test]
    fn test_proxyaddr_option() {
        let config = ScenarioConfig {
            autolocalsocks: false,
            proxyaddr: Some(SocketAddr::new("10.10.8.88", 5060)),
            ..Default::default()
        };
        let scen = scenario(&config).unwrap();
        let prepared = scen.prepare().unwrap();
        assert!(prepared[1].render().contains("-rsa '10.10.8.88':'5060'"));
        assert!(prepared[0].proxyaddr().is_none());
    }

    struct Reversed;

    impl Hooks for Reversed {
        fn order_agents(&self, agents: &[UserAgent]) -> Option<Vec<UserAgent>> {
            Some(agents.iter().rev().cloned().collect())
        }

        fn conf_scen(&self, scen: &mut Scenario) -> Result<()> {
            scen.client_defaults_mut().set("uri_username", "doggy")
        }

        fn post_ua_defaults(&self, agent: &mut UserAgent) -> Result<()> {
            agent.set("timeout", "30s")
        }
    }

    #[test]
    fn test_caller_hooks() {
        let config = ScenarioConfig {
            autolocalsocks: false,
            hooks: vec![Arc::new(Reversed)],
            ..Default::default()
        };
        let scen = scenario(&config).unwrap();

        // default agents come in as uas, uac
        let names: Vec<String> = scen.agent_list().iter().map(UserAgent::name).collect();
        assert_eq!(names, ["uac", "uas"]);

        let prepared = scen.prepare().unwrap();
        assert_eq!(prepared[0].get_str("uri_username").as_deref(), Some("doggy"));
        assert!(prepared.iter().all(|a| a.get_str("timeout").as_deref() == Some("30s")));
    }

    #[test]
    fn test_getsockaddr_loopback() {
        let addr = getsockaddr("127.0.0.1").unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_ne!(addr.port, 0);
    }

    #[test]
    fn test_load_scendir_filter() {
        struct SkipAll;
        impl Hooks for SkipAll {
            fn load_scendir(&self, _path: &Path, _xmls: &[PathBuf]) -> Option<bool> {
                Some(false)
            }
        }

        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("uac.xml"), "<scenario/>").unwrap();
        std::fs::write(root.path().join("uas.xml"), "<scenario/>").unwrap();

        let mut config = ScenarioConfig {
            autolocalsocks: false,
            ..Default::default()
        };
        assert_eq!(walk(root.path(), &config).unwrap().len(), 1);

        config.hooks.push(Arc::new(SkipAll));
        assert!(walk(root.path(), &config).unwrap().is_empty());
    }
}
