//! Agent settings
//!
//! An ordered map over a closed key set: every SIPp field name, the composed
//! socket keys (`srcaddr`, `destaddr`, `mediaaddr`, `proxyaddr`, `ipcaddr`)
//! and `logdir`. Socket keys are stored split into their host and port
//! fields, so layers always merge field by field.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::command::{sipp_field, SocketAddr, Value};
use crate::common::{Error, Result};

/// Key holding the directory agent log files are written to
pub const LOGDIR_KEY: &str = "logdir";

/// The composed socket pairs of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// local_host, local_port
    Src,
    /// remote_host, remote_port
    Dest,
    /// media_addr, media_port
    Media,
    /// proxy_host, proxy_port
    Proxy,
    /// ipc_host, ipc_port
    Ipc,
}

impl SocketKind {
    pub const ALL: [SocketKind; 5] = [
        SocketKind::Src,
        SocketKind::Dest,
        SocketKind::Media,
        SocketKind::Proxy,
        SocketKind::Ipc,
    ];

    /// Settings key of the composed pair
    pub fn key(self) -> &'static str {
        match self {
            SocketKind::Src => "srcaddr",
            SocketKind::Dest => "destaddr",
            SocketKind::Media => "mediaaddr",
            SocketKind::Proxy => "proxyaddr",
            SocketKind::Ipc => "ipcaddr",
        }
    }

    pub fn host_field(self) -> &'static str {
        match self {
            SocketKind::Src => "local_host",
            SocketKind::Dest => "remote_host",
            SocketKind::Media => "media_addr",
            SocketKind::Proxy => "proxy_host",
            SocketKind::Ipc => "ipc_host",
        }
    }

    pub fn port_field(self) -> &'static str {
        match self {
            SocketKind::Src => "local_port",
            SocketKind::Dest => "remote_port",
            SocketKind::Media => "media_port",
            SocketKind::Proxy => "proxy_port",
            SocketKind::Ipc => "ipc_port",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    /// Compose a socket address from separately stored host and port values
    pub fn compose(host: Option<&Value>, port: Option<&Value>) -> Option<SocketAddr> {
        let host = host.filter(|v| v.is_truthy())?.as_scalar()?;
        let port = match port.filter(|v| v.is_truthy())? {
            Value::Int(i) => u16::try_from(*i).ok()?,
            Value::Str(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        Some(SocketAddr::new(host, port))
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketKind::Src => "src",
            SocketKind::Dest => "dest",
            SocketKind::Media => "media",
            SocketKind::Proxy => "proxy",
            SocketKind::Ipc => "ipc",
        };
        f.write_str(name)
    }
}

impl FromStr for SocketKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "src" => Ok(SocketKind::Src),
            "dest" => Ok(SocketKind::Dest),
            "media" => Ok(SocketKind::Media),
            "proxy" => Ok(SocketKind::Proxy),
            "ipc" => Ok(SocketKind::Ipc),
            other => SocketKind::from_key(other)
                .ok_or_else(|| Error::invalid_value(other, "one of src, dest, media, proxy, ipc")),
        }
    }
}

/// Coerce a value given for a composed socket key
pub(crate) fn socket_value(key: &str, value: Value) -> Result<SocketAddr> {
    match value {
        Value::Addr(addr) => Ok(addr),
        Value::Str(s) => s
            .parse()
            .map_err(|_| Error::invalid_value(key, "a (host, port) socket address")),
        other => Err(Error::invalid_value(
            key,
            &format!("a (host, port) socket address, got {}", other.kind_name()),
        )),
    }
}

/// Ordered settings over the closed agent key set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: IndexMap<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from `(key, value)` pairs, validating each
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut settings = Self::new();
        for (key, value) in pairs {
            settings.set(key.as_ref(), value)?;
        }
        Ok(settings)
    }

    /// Build settings from a TOML table; socket keys take `"host:port"`
    pub fn from_toml(table: &toml::Table) -> Result<Self> {
        let mut settings = Self::new();
        for (key, value) in table {
            settings.set(key, Value::from_toml(key, value)?)?;
        }
        Ok(settings)
    }

    /// Validate and store a value
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();

        if let Some(kind) = SocketKind::from_key(key) {
            let addr = socket_value(key, value)?;
            self.values
                .insert(kind.host_field().to_string(), Value::Str(addr.host));
            self.values
                .insert(kind.port_field().to_string(), Value::Int(i64::from(addr.port)));
            return Ok(());
        }

        if key == LOGDIR_KEY {
            if !matches!(value, Value::Str(_)) {
                return Err(Error::invalid_value(key, "a directory path"));
            }
            self.values.insert(key.to_string(), value);
            return Ok(());
        }

        let field = sipp_field(key).ok_or_else(|| Error::unknown_field(key))?;
        field.validate(&value)?;
        self.values.insert(field.name.to_string(), value);
        Ok(())
    }

    /// Store a value known to fit its key
    pub(crate) fn insert_unchecked(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Set a value only when the key holds nothing yet
    pub fn setdefault(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        if self.contains(key) {
            return Ok(());
        }
        self.set(key, value)
    }

    /// Stored value; socket keys are composed from their parts
    pub fn get(&self, key: &str) -> Option<Value> {
        match SocketKind::from_key(key) {
            Some(kind) => self.sockaddr(kind).map(Value::Addr),
            None => self.values.get(key).cloned(),
        }
    }

    pub fn sockaddr(&self, kind: SocketKind) -> Option<SocketAddr> {
        SocketKind::compose(
            self.values.get(kind.host_field()),
            self.values.get(kind.port_field()),
        )
    }

    pub fn set_sockaddr(&mut self, kind: SocketKind, addr: SocketAddr) -> Result<()> {
        self.set(kind.key(), addr)
    }

    /// Whether a key holds a value; socket keys need both parts
    pub fn contains(&self, key: &str) -> bool {
        match SocketKind::from_key(key) {
            Some(kind) => self.sockaddr(kind).is_some(),
            None => self.values.contains_key(key),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match SocketKind::from_key(key) {
            Some(kind) => {
                let addr = self.sockaddr(kind);
                self.values.shift_remove(kind.host_field());
                self.values.shift_remove(kind.port_field());
                addr.map(Value::Addr)
            }
            None => self.values.shift_remove(key),
        }
    }

    pub fn logdir(&self) -> Option<PathBuf> {
        self.values
            .get(LOGDIR_KEY)
            .and_then(Value::as_scalar)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge layers, lowest precedence first
    ///
    /// Scalars overwrite. Map values are unioned one level deep, so the same
    /// key in several layers accumulates entries instead of being replaced.
    pub fn merge(layers: &[&Settings]) -> Settings {
        let mut merged = layers.first().map(|s| (*s).clone()).unwrap_or_default();

        for layer in layers.iter().skip(1) {
            for (key, value) in &layer.values {
                match (merged.values.get_mut(key), value) {
                    (Some(Value::Map(existing)), Value::Map(inner)) => {
                        existing.extend(inner.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    _ => {
                        merged.values.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        merged
    }
}
