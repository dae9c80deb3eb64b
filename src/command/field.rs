//! Field descriptors
//!
//! A field is one named slot of a command line: a flag template holding a
//! single `{name}` placeholder plus a kind deciding how a value is checked
//! and substituted.

use std::net::Ipv6Addr;

use crate::common::{Error, Result};

use super::Value;

/// How a field validates and renders its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Quoted value substituted into the template
    Plain,
    /// Like `Plain`, but IPv6 literals are bracket-wrapped
    Addr,
    /// Bare flag when true
    Bool,
    /// One flag occurrence per `key 'value'` entry
    Map,
    /// One flag occurrence per element
    List,
}

/// One named command slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub template: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn plain(name: &'static str, template: &'static str) -> Self {
        Self {
            name,
            template,
            kind: FieldKind::Plain,
        }
    }

    pub const fn addr(name: &'static str, template: &'static str) -> Self {
        Self {
            name,
            template,
            kind: FieldKind::Addr,
        }
    }

    pub const fn flag(name: &'static str, template: &'static str) -> Self {
        Self {
            name,
            template,
            kind: FieldKind::Bool,
        }
    }

    pub const fn map(name: &'static str, template: &'static str) -> Self {
        Self {
            name,
            template,
            kind: FieldKind::Map,
        }
    }

    pub const fn list(name: &'static str, template: &'static str) -> Self {
        Self {
            name,
            template,
            kind: FieldKind::List,
        }
    }

    fn placeholder(&self) -> String {
        format!("{{{}}}", self.name)
    }

    fn substitute(&self, token: &str) -> String {
        self.template.replacen(&self.placeholder(), token, 1)
    }

    /// Check that `value` is acceptable for this field
    pub fn validate(&self, value: &Value) -> Result<()> {
        let ok = match self.kind {
            FieldKind::Plain | FieldKind::Addr => matches!(value, Value::Str(_) | Value::Int(_)),
            FieldKind::Bool => matches!(value, Value::Bool(_)),
            FieldKind::Map => matches!(value, Value::Map(_)),
            FieldKind::List => matches!(value, Value::List(_)),
        };
        if ok {
            return Ok(());
        }

        let expected = match self.kind {
            FieldKind::Plain | FieldKind::Addr => "a string or integer",
            FieldKind::Bool => "a boolean type",
            FieldKind::Map => "a map",
            FieldKind::List => "a list",
        };
        Err(Error::invalid_value(
            self.name,
            &format!("{}, got {}", expected, value.kind_name()),
        ))
    }

    /// Render `value`, or an empty string when it is falsy
    pub fn render(&self, value: &Value) -> String {
        if !value.is_truthy() {
            return String::new();
        }

        match (self.kind, value) {
            (FieldKind::Plain, v) => v
                .as_scalar()
                .map(|s| self.substitute(&format!("'{}'", s)))
                .unwrap_or_default(),
            (FieldKind::Addr, v) => v
                .as_scalar()
                .map(|s| {
                    if s.parse::<Ipv6Addr>().is_ok() {
                        self.substitute(&format!("'[{}]'", s))
                    } else {
                        self.substitute(&format!("'{}'", s))
                    }
                })
                .unwrap_or_default(),
            (FieldKind::Bool, _) => self.substitute(""),
            (FieldKind::Map, Value::Map(m)) => m
                .iter()
                .map(|(k, v)| self.substitute(&format!("{} '{}'", k, v)))
                .collect(),
            (FieldKind::List, Value::List(l)) => l
                .iter()
                .map(|v| self.substitute(&format!("'{}'", v)))
                .collect(),
            _ => String::new(),
        }
    }

    /// Whether the template holds exactly one placeholder, named after the field
    pub fn is_well_formed(&self) -> bool {
        let opens = self.template.matches('{').count();
        let closes = self.template.matches('}').count();
        opens == 1 && closes == 1 && self.template.contains(&self.placeholder())
    }
}
