//! Parameter bags passed to every action invocation.
//!
//! A [`Params`] is a JSON object with typed accessors.  Keys starting with
//! an underscore are reserved for plumbing injected by the orchestrator:
//! `_backup_path` (root of the backup being written) and
//! `_prev_backup_path` (root of the previous backup, for incremental
//! copies).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Reserved key holding the current backup root path.
pub const BACKUP_PATH_KEY: &str = "_backup_path";
/// Reserved key holding the previous backup root path.
pub const PREV_BACKUP_PATH_KEY: &str = "_prev_backup_path";

/// Key-value parameter bag for one pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a bag from a JSON value.
    ///
    /// Objects are used as-is.  A bare string becomes `{"path": value}`,
    /// matching how single-string stage definitions are interpreted.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::String(s) => {
                let mut map = Map::new();
                map.insert("path".into(), Value::String(s));
                Self(map)
            }
            Value::Null => Self::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                Self(map)
            }
        }
    }

    /// Insert a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Remove a value, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether the bag contains a key.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Required string parameter.
    pub fn str(&self, key: &str) -> Result<&str> {
        self.opt_str(key)?
            .ok_or_else(|| Error::missing_param(key))
    }

    /// Optional string parameter.
    pub fn opt_str(&self, key: &str) -> Result<Option<&str>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::invalid_param(key, "must be a string")),
        }
    }

    /// Optional unsigned integer parameter.
    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| Error::invalid_param(key, "must be a non-negative integer")),
            Some(_) => Err(Error::invalid_param(key, "must be an integer")),
        }
    }

    /// Boolean parameter with a default.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(Error::invalid_param(key, "must be a boolean")),
        }
    }

    /// Required path parameter.
    pub fn path(&self, key: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(self.str(key)?))
    }

    /// Optional path parameter.
    pub fn opt_path(&self, key: &str) -> Result<Option<PathBuf>> {
        Ok(self.opt_str(key)?.map(PathBuf::from))
    }

    /// Optional list-of-strings parameter.
    pub fn opt_str_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(Error::invalid_param(key, "must be a list of strings")),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(Error::invalid_param(key, "must be a list of strings")),
        }
    }

    /// Optional string-to-string map parameter.
    pub fn opt_str_map(&self, key: &str) -> Result<Option<BTreeMap<String, String>>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    match v {
                        Value::String(s) => {
                            out.insert(k.clone(), s.clone());
                        }
                        _ => {
                            return Err(Error::invalid_param(
                                key,
                                format!("entry {k} must be a string"),
                            ))
                        }
                    }
                }
                Ok(Some(out))
            }
            Some(_) => Err(Error::invalid_param(key, "must be a table of strings")),
        }
    }

    /// Optional nested parameter bag.
    pub fn opt_bag(&self, key: &str) -> Result<Option<Params>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Params(map.clone()))),
            Some(_) => Err(Error::invalid_param(key, "must be a table")),
        }
    }

    /// Current backup root injected by the orchestrator.
    pub fn backup_path(&self) -> Result<PathBuf> {
        self.path(BACKUP_PATH_KEY)
    }

    /// Previous backup root, if one exists.
    pub fn prev_backup_path(&self) -> Result<Option<PathBuf>> {
        self.opt_path(PREV_BACKUP_PATH_KEY)
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}
