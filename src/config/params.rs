// src/config/params.rs

//! The configuration snapshot handed to activation predicates and work
//! units: the `[params]` table plus any `--param key=value` overrides.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{PipedagError, Result};

/// A single `[params]` value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Truthiness used by activation predicates.
    ///
    /// Strings are false when empty or one of `false`, `no`, `0`, `none`.
    pub fn is_truthy(&self) -> bool {
        match self {
            ParamValue::Bool(b) => *b,
            ParamValue::Int(i) => *i != 0,
            ParamValue::Float(f) => *f != 0.0,
            ParamValue::Str(s) => !matches!(
                s.trim().to_lowercase().as_str(),
                "" | "false" | "no" | "0" | "none"
            ),
            ParamValue::List(items) => !items.is_empty(),
        }
    }

    /// Parse a CLI override value: booleans, integers, floats, else string.
    pub fn parse_loose(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_lowercase().as_str() {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return ParamValue::Float(f);
        }
        ParamValue::Str(raw.to_string())
    }

    fn from_toml(key: &str, value: &toml::Value) -> Result<Self> {
        Ok(match value {
            toml::Value::Boolean(b) => ParamValue::Bool(*b),
            toml::Value::Integer(i) => ParamValue::Int(*i),
            toml::Value::Float(f) => ParamValue::Float(*f),
            toml::Value::String(s) => ParamValue::Str(s.clone()),
            toml::Value::Array(items) => ParamValue::List(
                items
                    .iter()
                    .map(|v| ParamValue::from_toml(key, v))
                    .collect::<Result<Vec<_>>>()?,
            ),
            toml::Value::Datetime(dt) => ParamValue::Str(dt.to_string()),
            toml::Value::Table(_) => {
                return Err(PipedagError::ConfigError(format!(
                    "[params].{key}: nested tables are not supported"
                )));
            }
        })
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(" "))
            }
        }
    }
}

/// Option name → value mapping passed explicitly into planning and
/// execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in table.iter() {
            values.insert(key.clone(), ParamValue::from_toml(key, value)?);
        }
        Ok(Self { values })
    }

    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) {
        self.values.insert(key.into(), value);
    }

    /// Builder-style `set`, handy in tests and programmatic pipelines.
    pub fn with(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.set(key, value);
        self
    }

    /// Apply a `key=value` override.
    pub fn apply_override(&mut self, spec: &str) -> Result<()> {
        let (key, value) = spec.split_once('=').ok_or_else(|| {
            PipedagError::ConfigError(format!("invalid --param {spec:?}: expected KEY=VALUE"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(PipedagError::ConfigError(format!(
                "invalid --param {spec:?}: empty key"
            )));
        }
        self.set(key, ParamValue::parse_loose(value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Missing keys are false.
    pub fn is_truthy(&self, key: &str) -> bool {
        self.get(key).is_some_and(ParamValue::is_truthy)
    }

    /// Value rendered as a string for `{param:key}` substitution.
    pub fn render(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
