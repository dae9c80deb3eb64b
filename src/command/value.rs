//! Field values and socket addresses

use std::fmt;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// A value assignable to a command field or a settings key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Map(IndexMap<String, String>),
    List(Vec<String>),
    /// Composite (host, port) pair, only accepted by socket settings keys
    Addr(SocketAddr),
}

impl Value {
    /// Build a map value from key/value pairs, preserving order
    pub fn map<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        Value::Map(
            items
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }

    /// Build a list value
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Value::List(items.into_iter().map(|v| v.to_string()).collect())
    }

    /// Empty strings, zero, `false` and empty collections are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Int(i) => *i != 0,
            Value::Bool(b) => *b,
            Value::Map(m) => !m.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Addr(_) => true,
        }
    }

    /// Scalar text of a string or integer value
    pub fn as_scalar(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_addr(&self) -> Option<&SocketAddr> {
        match self {
            Value::Addr(a) => Some(a),
            _ => None,
        }
    }

    /// Short kind name used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Map(_) => "map",
            Value::List(_) => "list",
            Value::Addr(_) => "socket address",
        }
    }

    /// Convert a TOML value from a configuration file
    pub fn from_toml(key: &str, value: &toml::Value) -> Result<Self> {
        match value {
            toml::Value::String(s) => Ok(Value::Str(s.clone())),
            toml::Value::Integer(i) => Ok(Value::Int(*i)),
            toml::Value::Boolean(b) => Ok(Value::Bool(*b)),
            toml::Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    toml::Value::String(s) => Ok(s.clone()),
                    toml::Value::Integer(i) => Ok(i.to_string()),
                    _ => Err(Error::invalid_value(key, "a list of strings or integers")),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            toml::Value::Table(table) => table
                .iter()
                .map(|(k, v)| match v {
                    toml::Value::String(s) => Ok((k.clone(), s.clone())),
                    toml::Value::Integer(i) => Ok((k.clone(), i.to_string())),
                    _ => Err(Error::invalid_value(key, "a table of strings or integers")),
                })
                .collect::<Result<IndexMap<_, _>>>()
                .map(Value::Map),
            _ => Err(Error::invalid_value(key, "a string, integer, boolean, array or table")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&Path> for Value {
    fn from(p: &Path) -> Self {
        Value::Str(p.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::from(p.as_path())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<IndexMap<String, String>> for Value {
    fn from(m: IndexMap<String, String>) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<String>> for Value {
    fn from(l: Vec<String>) -> Self {
        Value::List(l)
    }
}

impl From<Vec<&str>> for Value {
    fn from(l: Vec<&str>) -> Self {
        Value::list(l)
    }
}

impl From<SocketAddr> for Value {
    fn from(a: SocketAddr) -> Self {
        Value::Addr(a)
    }
}

impl From<(&str, u16)> for Value {
    fn from((host, port): (&str, u16)) -> Self {
        Value::Addr(SocketAddr::new(host, port))
    }
}

/// A (host, port) socket pair as passed to SIPp
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketAddr {
    pub host: String,
    pub port: u16,
}

impl SocketAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for SocketAddr {
    type Err = Error;

    /// Parse `host:port` or `[v6]:port`
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::invalid_value(s, "a 'host:port' socket address");

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(bad)?;
            (host, port)
        } else {
            s.rsplit_once(':').ok_or_else(bad)?
        };

        if host.is_empty() {
            return Err(bad());
        }
        let port = port.parse::<u16>().map_err(|_| bad())?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for SocketAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
