//! Task definition files and the env placeholder resolution applied to
//! action parameters before a run.

use anyhow::{bail, Context, Result};
use backhaul_actions::{Params, Stage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

pub type Env = BTreeMap<String, serde_json::Value>;

/// One definition file: a named group of tasks sharing an env and an
/// optional subfolder inside the backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(default)]
    pub name: Option<String>,
    /// Folder inside the backup directory where results land.
    #[serde(default)]
    pub inside: Option<PathBuf>,
    #[serde(default)]
    pub env: Env,
    pub tasks: Vec<TaskDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    #[serde(default)]
    pub env: Env,
    /// Whether a failure of this task aborts the rest of the file.
    #[serde(default = "default_stop_on_fail")]
    pub stop_on_fail: bool,
    pub actions: Vec<ActionDef>,
}

fn default_stop_on_fail() -> bool {
    true
}

/// A single-key table: `{ action-id = params }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDef(pub BTreeMap<String, serde_json::Value>);

impl ActionDef {
    pub fn action(&self) -> Result<(&str, &serde_json::Value)> {
        let mut entries = self.0.iter();
        match (entries.next(), entries.next()) {
            (Some((key, value)), None) => Ok((key, value)),
            _ => bail!("each action must be a table with exactly one key"),
        }
    }
}

/// Parse a definition file. The file name (without extension) is the
/// default group name; task names must be unique within the file.
pub fn load_task_file(path: &Path) -> Result<TaskFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file: {:?}", path))?;
    let mut file: TaskFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse tasks file: {:?}", path))?;

    if file.name.is_none() {
        file.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
    }
    let mut seen = std::collections::BTreeSet::new();
    for task in &file.tasks {
        if !seen.insert(task.name.as_str()) {
            bail!("task name {:?} is repeated in {:?}", task.name, path);
        }
        for action in &task.actions {
            action.action()?;
        }
    }
    Ok(file)
}

/// Task definition files under `tasks_path`, sorted by file name.
pub fn discover(tasks_path: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(tasks_path)
        .with_context(|| format!("Tasks folder does not exist: {:?}", tasks_path))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    Ok(files)
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(?i)[a-z0-9_-]*\}").unwrap()
});

fn env_text(env: &Env, name: &str) -> Option<String> {
    match env.get(name) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            warn!("env value {name} is not a string ({other}), ignoring");
            Some(String::new())
        }
        None => None,
    }
}

fn resolve_text(text: &str, env: &Env) -> String {
    let mut out = String::new();
    let mut last = 0;
    for found in PLACEHOLDER.find_iter(text) {
        let name = &text[found.start() + 2..found.end() - 1];
        let value = env_text(env, name)
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_else(|| {
                warn!("environment variable {name} cannot be found, ignoring");
                String::new()
            });
        out.push_str(&text[last..found.start()]);
        out.push_str(&value);
        last = found.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Replaces `${VAR}` placeholders in every string of `value`, looking
/// the name up in the task env first and the process env second.
pub fn resolve_placeholders(value: &mut serde_json::Value, env: &Env) {
    match value {
        serde_json::Value::String(text) => {
            *text = resolve_text(text, env);
        }
        serde_json::Value::Array(items) => {
            for item in items {
                resolve_placeholders(item, env);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                resolve_placeholders(item, env);
            }
        }
        _ => {}
    }
}

/// Turns a task definition into runnable stages: table-shaped params
/// get the env merged underneath them, then placeholders resolve.
pub fn build_stages(task: &TaskDef, env: &Env) -> Result<Vec<Stage>> {
    let mut stages = Vec::with_capacity(task.actions.len());
    for def in &task.actions {
        let (name, raw) = def.action()?;
        let value = match raw {
            serde_json::Value::Object(map) => {
                let mut merged = serde_json::Map::new();
                for (key, val) in env {
                    merged.insert(key.clone(), val.clone());
                }
                for (key, val) in map {
                    merged.insert(key.clone(), val.clone());
                }
                let mut value = serde_json::Value::Object(merged);
                resolve_placeholders(&mut value, env);
                value
            }
            other => {
                let mut value = other.clone();
                resolve_placeholders(&mut value, env);
                value
            }
        };
        stages.push(Stage::new(name, Params::from_value(value)));
    }
    Ok(stages)
}
