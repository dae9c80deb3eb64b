//! Command string rendering
//!
//! A [`Renderer`] pairs a fixed, ordered table of [`FieldSpec`]s with the
//! values assigned to them. Rendering walks the table in order and joins the
//! output of every truthy field, so the table order is the flag order the
//! external binary receives.

mod field;
mod value;

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::common::{Error, Result};

pub use field::{FieldKind, FieldSpec};
pub use value::{SocketAddr, Value};

/// The SIPp command line grammar
pub static SIPP_SPEC: &[FieldSpec] = &[
    // contact info
    FieldSpec::plain("prefix", "{prefix} "),
    FieldSpec::plain("bin_path", "{bin_path} "),
    FieldSpec::addr("local_host", "-i {local_host} "),
    FieldSpec::plain("local_port", "-p {local_port} "),
    FieldSpec::plain("uri_username", "-s {uri_username} "),
    FieldSpec::addr("proxy_host", "-rsa {proxy_host}"), // no space
    FieldSpec::plain("proxy_port", ":{proxy_port} "),
    FieldSpec::plain("auth_uri", "-auth_uri {auth_uri} "),
    // sockets and protocols
    FieldSpec::plain("bind_local", "-bind_local {bind_local} "),
    FieldSpec::addr("media_addr", "-mi {media_addr} "),
    FieldSpec::plain("media_port", "-mp {media_port} "),
    FieldSpec::plain("transport", "-t {transport} "),
    // scenario config/ctl
    FieldSpec::plain("scen_name", "-sn {scen_name} "),
    FieldSpec::plain("scen_file", "-sf {scen_file} "),
    FieldSpec::plain("ooc_scen_file", "-oocsf {ooc_scen_file} "),
    FieldSpec::plain("recv_timeout", "-recv_timeout {recv_timeout} "),
    FieldSpec::plain("timeout", "-timeout {timeout} "),
    FieldSpec::plain("pause_duration", "-d {pause_duration} "),
    FieldSpec::plain("default_behaviors", "-default_behaviors {default_behaviors} "),
    FieldSpec::addr("ipc_host", "-3pcc {ipc_host}"), // no space
    FieldSpec::plain("ipc_port", ":{ipc_port} "),
    // SIP vars
    FieldSpec::plain("cid_str", "-cid_str {cid_str} "),
    FieldSpec::plain("base_cseq", "-base_cseq {base_cseq} "),
    FieldSpec::plain("auth_username", "-au {auth_username} "),
    FieldSpec::plain("auth_password", "-ap {auth_password} "),
    // load settings
    FieldSpec::plain("rate", "-r {rate} "),
    FieldSpec::plain("limit", "-l {limit} "),
    FieldSpec::plain("call_count", "-m {call_count} "),
    FieldSpec::plain("rate_period", "-rp {rate_period} "),
    FieldSpec::plain("users", "-users {users} "),
    FieldSpec::plain("deadcall_wait", "-deadcall_wait {deadcall_wait} "),
    // data insertion
    FieldSpec::map("key_vals", "-key {key_vals} "),
    FieldSpec::map("global_vars", "-set {global_vars} "),
    // files
    FieldSpec::plain("error_file", "-error_file {error_file} "),
    FieldSpec::plain("calldebug_file", "-calldebug_file {calldebug_file} "),
    FieldSpec::plain("message_file", "-message_file {message_file} "),
    FieldSpec::plain("log_file", "-log_file {log_file} "),
    FieldSpec::plain("info_file", "-inf {info_file} "),
    FieldSpec::list("info_files", "-inf {info_files} "),
    FieldSpec::plain("screen_file", "-screen_file {screen_file} "),
    // bool flags
    FieldSpec::flag("rtp_echo", "-rtp_echo {rtp_echo}"),
    FieldSpec::flag("timeout_error", "-timeout_error {timeout_error}"),
    FieldSpec::flag("auto_answer", "-aa {auto_answer}"),
    FieldSpec::flag("trace_error", "-trace_err {trace_error}"),
    FieldSpec::flag("trace_calldebug", "-trace_calldebug {trace_calldebug}"),
    FieldSpec::flag("trace_error_codes", "-trace_error_codes {trace_error_codes}"),
    FieldSpec::flag("trace_message", "-trace_msg {trace_message}"),
    FieldSpec::flag("trace_log", "-trace_logs {trace_log}"),
    FieldSpec::flag("trace_screen", "-trace_screen {trace_screen}"),
    FieldSpec::flag("error_overwrite", "-error_overwrite {error_overwrite}"),
    FieldSpec::addr("remote_host", "{remote_host}"), // no space
    FieldSpec::plain("remote_port", ":{remote_port}"),
];

/// Look up a SIPp field by name
pub fn sipp_field(name: &str) -> Option<&'static FieldSpec> {
    SIPP_SPEC.iter().find(|f| f.name == name)
}

/// Command string renderer over a fixed field table
///
/// The set of field names is closed: assigning a name the table does not
/// define fails, while every defined field stays assignable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renderer {
    spec: &'static [FieldSpec],
    values: HashMap<&'static str, Value>,
}

/// A renderer bound to the SIPp grammar
pub type SippCmd = Renderer;

impl Default for Renderer {
    fn default() -> Self {
        Self::new(SIPP_SPEC)
    }
}

impl Renderer {
    pub fn new(spec: &'static [FieldSpec]) -> Self {
        Self {
            spec,
            values: HashMap::new(),
        }
    }

    /// Create a renderer and apply `defaults` onto it
    pub fn with_values<I, K, V>(spec: &'static [FieldSpec], defaults: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut renderer = Self::new(spec);
        renderer.apply(defaults)?;
        Ok(renderer)
    }

    pub fn spec(&self) -> &'static [FieldSpec] {
        self.spec
    }

    /// Field names in table order
    pub fn keys(&self) -> impl Iterator<Item = &'static str> {
        self.spec.iter().map(|f| f.name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.spec.iter().any(|f| f.name == name)
    }

    fn field(&self, name: &str) -> Result<&'static FieldSpec> {
        self.spec
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::unknown_field(name))
    }

    /// Validate and store a field value
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self.field(name)?;
        let value = value.into();
        field.validate(&value)?;
        self.values.insert(field.name, value);
        Ok(())
    }

    /// Remove a field value, returning what was stored
    pub fn unset(&mut self, name: &str) -> Result<Option<Value>> {
        let field = self.field(name)?;
        Ok(self.values.remove(field.name))
    }

    /// Stored value of a field; `None` when unset or not a field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Scalar text of a string/integer field
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| v.is_truthy()).and_then(Value::as_scalar)
    }

    /// Integer value of a field, parsing numeric strings
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Int(i) => Some(*i),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether the field holds a truthy value
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).map(Value::is_truthy).unwrap_or(false)
    }

    /// Mutable access to a map field, created empty on first use
    pub fn map_mut(&mut self, name: &str) -> Result<&mut IndexMap<String, String>> {
        let field = self.field(name)?;
        if field.kind != FieldKind::Map {
            return Err(Error::invalid_value(name, "a map field"));
        }
        match self
            .values
            .entry(field.name)
            .or_insert_with(|| Value::Map(IndexMap::new()))
        {
            Value::Map(m) => Ok(m),
            other => Err(Error::Internal(format!(
                "map field '{}' holds a {}",
                name,
                other.kind_name()
            ))),
        }
    }

    /// Mutable access to a list field, created empty on first use
    pub fn list_mut(&mut self, name: &str) -> Result<&mut Vec<String>> {
        let field = self.field(name)?;
        if field.kind != FieldKind::List {
            return Err(Error::invalid_value(name, "a list field"));
        }
        match self
            .values
            .entry(field.name)
            .or_insert_with(|| Value::List(Vec::new()))
        {
            Value::List(l) => Ok(l),
            other => Err(Error::Internal(format!(
                "list field '{}' holds a {}",
                name,
                other.kind_name()
            ))),
        }
    }

    /// Apply every `(name, value)` pair in order
    pub fn apply<I, K, V>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in items {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Serialize all truthy fields, in table order
    pub fn todict(&self) -> IndexMap<&'static str, Value> {
        self.spec
            .iter()
            .filter_map(|f| {
                self.values
                    .get(f.name)
                    .filter(|v| v.is_truthy())
                    .map(|v| (f.name, v.clone()))
            })
            .collect()
    }

    /// Render the command string
    pub fn render(&self) -> String {
        self.spec
            .iter()
            .filter_map(|f| self.values.get(f.name).map(|v| f.render(v)))
            .collect()
    }
}

impl fmt::Display for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
