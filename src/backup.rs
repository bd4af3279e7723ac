//! Backup runs: staging directory, task execution, manifest, `current`
//! symlink.

use anyhow::{bail, Context, Result};
use backhaul_actions::{ActionRegistry, TaskRunner};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::tasks::{self, Env, TaskFile};

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_NAME: &str = ".manifest.json";
const PARTIAL_DIR: &str = ".partial";
const CURRENT_LINK: &str = "current";

/// Written at the root of every finished backup. Carries enough to
/// replay any task in reverse.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub created_at: chrono::DateTime<Utc>,
    pub task_files: BTreeMap<String, ManifestTaskFile>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTaskFile {
    #[serde(default)]
    pub env: Env,
    #[serde(default)]
    pub inside: Option<PathBuf>,
    pub tasks: Vec<ManifestTask>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTask {
    pub name: String,
    #[serde(default)]
    pub env: Env,
    pub actions: Vec<tasks::ActionDef>,
    /// Result path relative to the backup root; `None` when the task
    /// failed but the file continued.
    pub result: Option<PathBuf>,
}

pub struct BackupRunner<'a> {
    config: &'a Config,
    registry: &'a ActionRegistry,
}

impl<'a> BackupRunner<'a> {
    pub fn new(config: &'a Config, registry: &'a ActionRegistry) -> Self {
        Self { config, registry }
    }

    /// Runs every task of every definition file into a fresh backup
    /// directory and returns its path. The partial directory is removed
    /// when the run fails.
    pub fn run(&self) -> Result<PathBuf> {
        let partial = self.config.backups_path.join(PARTIAL_DIR);
        info!("Staging backup in {:?}", partial);
        std::fs::create_dir_all(&partial)
            .with_context(|| format!("Failed to create staging directory {:?}", partial))?;

        let result = self.run_into(&partial);
        if result.is_err() {
            debug!("Removing staging directory after failure");
            let _ = std::fs::remove_dir_all(&partial);
        }
        result
    }

    fn run_into(&self, partial: &Path) -> Result<PathBuf> {
        let prev = self.previous_backup();
        if let Some(prev) = &prev {
            info!("Previous backup found at {:?}", prev);
        }

        let mut results: BTreeMap<String, ManifestTaskFile> = BTreeMap::new();
        for path in tasks::discover(&self.config.tasks_path)? {
            let file = tasks::load_task_file(&path)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            results.insert(file_name, self.run_task_file(&file, partial, prev.as_deref())?);
        }

        let backup = self.finish(partial)?;
        self.write_manifest(&backup, results)?;
        self.repoint_current(&backup)?;
        Ok(backup)
    }

    fn run_task_file(
        &self,
        file: &TaskFile,
        backup_path: &Path,
        prev_backup: Option<&Path>,
    ) -> Result<ManifestTaskFile> {
        let group = file.name.as_deref().unwrap_or("unnamed");
        info!("Running tasks of {group}");

        let (final_path, final_prev) = inside_paths(file, backup_path, prev_backup)?;
        std::fs::create_dir_all(&final_path)?;

        let mut recorded = Vec::with_capacity(file.tasks.len());
        for task in &file.tasks {
            let mut env: Env = self.config.env.clone();
            env.extend(file.env.clone());
            env.extend(task.env.clone());
            env.insert(
                backhaul_actions::params::BACKUP_PATH_KEY.to_owned(),
                serde_json::Value::String(final_path.to_string_lossy().into_owned()),
            );
            if let Some(prev) = &final_prev {
                env.insert(
                    backhaul_actions::params::PREV_BACKUP_PATH_KEY.to_owned(),
                    serde_json::Value::String(prev.to_string_lossy().into_owned()),
                );
            }

            let stages = tasks::build_stages(task, &env)?;
            let runner = TaskRunner::new(self.registry);
            let result = match runner.run(&task.name, &stages) {
                Ok(result) => result,
                Err(err) => {
                    error!("Task {} of {group} failed: {err}", task.name);
                    if task.stop_on_fail {
                        bail!("task {} of {group} failed: {err}", task.name);
                    }
                    recorded.push(ManifestTask {
                        name: task.name.clone(),
                        env: task.env.clone(),
                        actions: task.actions.clone(),
                        result: None,
                    });
                    continue;
                }
            };
            let relative = result
                .as_deref()
                .map(|path| path.strip_prefix(backup_path).unwrap_or(path).to_path_buf());
            recorded.push(ManifestTask {
                name: task.name.clone(),
                env: task.env.clone(),
                actions: task.actions.clone(),
                result: relative,
            });
        }

        Ok(ManifestTaskFile {
            env: file.env.clone(),
            inside: file.inside.clone(),
            tasks: recorded,
        })
    }

    /// Resolved target of the `current` symlink, if any.
    fn previous_backup(&self) -> Option<PathBuf> {
        std::fs::canonicalize(self.config.backups_path.join(CURRENT_LINK)).ok()
    }

    fn finish(&self, partial: &Path) -> Result<PathBuf> {
        let backup = self.config.backups_path.join(timestamp_name());
        info!("Moving {:?} to {:?}", partial, backup);
        std::fs::rename(partial, &backup)
            .with_context(|| format!("Failed to move staging directory to {:?}", backup))?;
        Ok(backup)
    }

    fn write_manifest(
        &self,
        backup: &Path,
        task_files: BTreeMap<String, ManifestTaskFile>,
    ) -> Result<()> {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            task_files,
        };
        let path = backup.join(MANIFEST_NAME);
        debug!("Writing manifest at {:?}", path);
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write manifest at {:?}", path))?;
        Ok(())
    }

    fn repoint_current(&self, backup: &Path) -> Result<()> {
        let current = self.config.backups_path.join(CURRENT_LINK);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => std::fs::remove_file(&current)?,
            Ok(_) => bail!("{:?} exists and is not a symlink", current),
            Err(_) => {}
        }
        std::os::unix::fs::symlink(backup, &current)?;
        Ok(())
    }
}

/// Applies the file's `inside` folder to the backup and previous-backup
/// roots. The folder must stay inside the backup path.
fn inside_paths(
    file: &TaskFile,
    backup_path: &Path,
    prev_backup: Option<&Path>,
) -> Result<(PathBuf, Option<PathBuf>)> {
    let Some(inside) = &file.inside else {
        return Ok((backup_path.to_path_buf(), prev_backup.map(Path::to_path_buf)));
    };
    if inside.is_absolute()
        || inside
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        bail!("inside is not valid: cannot go outside the backup path, use relative paths");
    }
    Ok((
        backup_path.join(inside),
        prev_backup.map(|prev| prev.join(inside)),
    ))
}

static BACKUP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}$").unwrap());

fn timestamp_name() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M").to_string()
}

/// Finished backups under `backups_path`, sorted oldest first.
pub fn list_backups(backups_path: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(backups_path)
        .with_context(|| format!("Backups folder does not exist: {:?}", backups_path))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| BACKUP_NAME.is_match(name))
        .collect();
    names.sort();
    Ok(names)
}

/// Resolve a backup by name, with `current` following the symlink.
pub fn resolve_backup(backups_path: &Path, name: &str) -> Result<PathBuf> {
    let path = if name == CURRENT_LINK {
        std::fs::canonicalize(backups_path.join(CURRENT_LINK))
            .context("No current backup symlink")?
    } else {
        backups_path.join(name)
    };
    if !path.is_dir() {
        bail!("Backup {name} does not exist");
    }
    Ok(path)
}

/// Load the manifest of a finished backup.
pub fn load_manifest(backup: &Path) -> Result<Manifest> {
    let path = backup.join(MANIFEST_NAME);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read manifest at {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse manifest at {:?}", path))
}
