//! User agents
//!
//! A [`UserAgent`] is a SIPp command renderer with an identity: a name
//! derived from its scenario, a role (client or server) derived from that
//! name, composed socket pairs and log file handling.

mod settings;

use std::path::{Path, PathBuf};

use crate::command::{SippCmd, SocketAddr, Value};
use crate::common::{paths, Error, Result};

pub use settings::{Settings, SocketKind, LOGDIR_KEY};

/// Log kinds SIPp can write; each maps to a `<kind>_file` and `trace_<kind>`
/// field pair
pub const LOG_TYPES: [&str; 5] = ["screen", "calldebug", "message", "log", "error"];

/// Name used when neither a scenario name nor a script is set
pub const UNNAMED: &str = "unnamed";

/// One scenario participant rendered as a SIPp invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgent {
    cmd: SippCmd,
    logdir: Option<PathBuf>,
}

impl UserAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an agent with `settings` applied in order
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut agent = Self::new();
        for (key, value) in settings.iter() {
            agent.set(key, value.clone())?;
        }
        Ok(agent)
    }

    /// Assign a field, a composed socket key or `logdir`
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();

        if let Some(kind) = SocketKind::from_key(key) {
            let addr = settings::socket_value(key, value)?;
            return self.set_sockaddr(kind, Some(addr));
        }

        if key == LOGDIR_KEY {
            let dir = value
                .as_scalar()
                .ok_or_else(|| Error::invalid_value(key, "a directory path"))?;
            return self.set_logdir(dir);
        }

        self.cmd.set(key, value)
    }

    pub fn unset(&mut self, name: &str) -> Result<Option<Value>> {
        self.cmd.unset(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cmd.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.cmd.get_str(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.cmd.get_int(name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.cmd.is_set(name)
    }

    pub fn map_mut(&mut self, name: &str) -> Result<&mut indexmap::IndexMap<String, String>> {
        self.cmd.map_mut(name)
    }

    pub fn list_mut(&mut self, name: &str) -> Result<&mut Vec<String>> {
        self.cmd.list_mut(name)
    }

    /// The underlying command renderer
    pub fn command(&self) -> &SippCmd {
        &self.cmd
    }

    /// Name derived from the scenario name or script file
    pub fn name(&self) -> String {
        self.get_str("scen_name")
            .or_else(|| self.get_str("scen_file").and_then(|f| path_stem(&f)))
            .unwrap_or_else(|| UNNAMED.to_string())
    }

    // NOTE: role is a substring test on the name, so a script called e.g.
    // "uas_to_uac.xml" is classified as both.
    pub fn is_client(&self) -> bool {
        self.name().to_lowercase().contains("uac")
    }

    pub fn is_server(&self) -> bool {
        self.name().to_lowercase().contains("uas")
    }

    /// Composed socket pair; `None` unless both parts are set
    pub fn sockaddr(&self, kind: SocketKind) -> Option<SocketAddr> {
        SocketKind::compose(self.get(kind.host_field()), self.get(kind.port_field()))
    }

    /// Assign both parts of a socket pair, or clear them with `None`
    pub fn set_sockaddr(&mut self, kind: SocketKind, addr: Option<SocketAddr>) -> Result<()> {
        match addr {
            Some(addr) => {
                self.cmd.set(kind.host_field(), addr.host)?;
                self.cmd.set(kind.port_field(), addr.port)?;
            }
            None => {
                self.cmd.unset(kind.host_field())?;
                self.cmd.unset(kind.port_field())?;
            }
        }
        Ok(())
    }

    pub fn srcaddr(&self) -> Option<SocketAddr> {
        self.sockaddr(SocketKind::Src)
    }

    pub fn destaddr(&self) -> Option<SocketAddr> {
        self.sockaddr(SocketKind::Dest)
    }

    pub fn mediaaddr(&self) -> Option<SocketAddr> {
        self.sockaddr(SocketKind::Media)
    }

    pub fn proxyaddr(&self) -> Option<SocketAddr> {
        self.sockaddr(SocketKind::Proxy)
    }

    pub fn ipcaddr(&self) -> Option<SocketAddr> {
        self.sockaddr(SocketKind::Ipc)
    }

    /// `(rate, limit, call_count)`, present only when all three are set
    pub fn call_load(&self) -> Option<(i64, i64, i64)> {
        let rate = self.get_int("rate").filter(|v| *v != 0)?;
        let limit = self.get_int("limit").filter(|v| *v != 0)?;
        let count = self.get_int("call_count").filter(|v| *v != 0)?;
        Some((rate, limit, count))
    }

    pub fn set_call_load(&mut self, load: Option<(i64, i64, i64)>) -> Result<()> {
        match load {
            Some((rate, limit, count)) => {
                self.cmd.set("rate", rate)?;
                self.cmd.set("limit", limit)?;
                self.cmd.set("call_count", count)?;
            }
            None => {
                for name in ["rate", "limit", "call_count"] {
                    self.cmd.unset(name)?;
                }
            }
        }
        Ok(())
    }

    pub fn logdir(&self) -> Option<&Path> {
        self.logdir.as_deref()
    }

    /// Set the log directory; it must already exist
    pub fn set_logdir(&mut self, dir: impl Into<PathBuf>) -> Result<()> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::Config(format!("{} is an invalid path", dir.display())));
        }
        self.logdir = Some(dir);
        Ok(())
    }

    /// Truthy fields plus `logdir`, as settings for the merge
    pub fn todict(&self) -> Settings {
        let mut settings = Settings::new();
        for (name, value) in self.cmd.todict() {
            // values were validated on assignment
            if let Err(e) = settings.set(name, value) {
                tracing::warn!(field = name, error = %e, "Dropping unmergeable field");
            }
        }
        if let Some(dir) = &self.logdir {
            if let Err(e) = settings.set(LOGDIR_KEY, dir.as_path()) {
                tracing::warn!(error = %e, "Dropping logdir");
            }
        }
        settings
    }

    /// `(<kind>_file, path)` pairs for every log kind
    pub fn iter_logfile_items(&self) -> Vec<(String, Option<String>)> {
        LOG_TYPES
            .iter()
            .map(|kind| {
                let attr = format!("{}_file", kind);
                let value = self.get_str(&attr);
                (attr, value)
            })
            .collect()
    }

    /// Log files whose contents are worth echoing to the console
    pub fn toconsole_items(&self) -> Vec<(String, Option<String>)> {
        vec![("screen_file".to_string(), self.get_str("screen_file"))]
    }

    /// Turn on every trace flag
    pub fn enable_tracing(&mut self) -> Result<()> {
        for kind in LOG_TYPES {
            self.cmd.set(&format!("trace_{}", kind), true)?;
        }
        Ok(())
    }

    /// Point every log file into a log directory and enable tracing
    ///
    /// Files already set keep their name (absolute paths are kept as is);
    /// unset ones become `{name}_{kind}_file`. The directory is `logdir`,
    /// else the agent's own, else the system temp dir.
    pub fn enable_logging(&mut self, logdir: Option<&Path>) -> Result<()> {
        let dir = logdir
            .map(Path::to_path_buf)
            .or_else(|| self.logdir.clone())
            .unwrap_or_else(paths::default_logdir);
        let name = self.name();

        for (attr, value) in self.iter_logfile_items() {
            let file = value.unwrap_or_else(|| format!("{}_{}", name, attr));
            self.cmd.set(&attr, dir.join(file))?;
        }

        self.enable_tracing()
    }

    /// Whether the scenario script plays media
    pub fn plays_media(&self) -> bool {
        self.get_str("scen_file")
            .and_then(|f| std::fs::read_to_string(f).ok())
            .map(|script| script.contains("play_pcap_audio"))
            .unwrap_or(false)
    }

    /// Rendered SIPp command string
    pub fn render(&self) -> String {
        self.cmd.render()
    }
}

fn path_stem(path: &str) -> Option<String> {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

/// Default user agent factory
///
/// `bin_path` defaults to the `sipp` found on `PATH`. A provided `scen_file`
/// drops any `scen_name`, since SIPp takes one or the other.
pub fn ua(mut settings: Settings) -> Result<UserAgent> {
    let mut defaults = Settings::new();
    match which::which("sipp") {
        Ok(path) => defaults.set("bin_path", path)?,
        Err(_) => tracing::debug!("No sipp binary found on PATH"),
    }

    if settings.contains("scen_file") {
        settings.remove("scen_name");
    }

    UserAgent::from_settings(&Settings::merge(&[&defaults, &settings]))
}

/// A user agent server (receives a SIP message as its first action)
pub fn server(settings: Settings) -> Result<UserAgent> {
    if settings.contains(SocketKind::Dest.key()) {
        return Err(Error::Config(
            "User agent server does not accept a destination address".to_string(),
        ));
    }
    let mut defaults = Settings::new();
    defaults.set("scen_name", "uas")?;
    ua(Settings::merge(&[&defaults, &settings]))
}

/// A user agent client (sends a SIP message as its first action)
pub fn client(settings: Settings) -> Result<UserAgent> {
    let mut defaults = Settings::new();
    defaults.set("scen_name", "uac")?;
    ua(Settings::merge(&[&defaults, &settings]))
}
