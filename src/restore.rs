//! Restores: replay a backed up task's chain in reverse, driven by the
//! manifest recorded at backup time.

use anyhow::{bail, Context, Result};
use backhaul_actions::{ActionRegistry, TaskRunner};
use std::path::Path;
use tracing::info;

use crate::backup::{load_manifest, resolve_backup, ManifestTask, ManifestTaskFile};
use crate::config::Config;
use crate::tasks::{self, Env, TaskDef};

pub struct RestoreRunner<'a> {
    config: &'a Config,
    registry: &'a ActionRegistry,
}

impl<'a> RestoreRunner<'a> {
    pub fn new(config: &'a Config, registry: &'a ActionRegistry) -> Self {
        Self { config, registry }
    }

    /// Restore tasks from the named backup (`current` for the latest).
    /// With `task` only the matching task runs; otherwise every task
    /// recorded in the manifest does.
    pub fn run(&self, backup_name: &str, task: Option<&str>) -> Result<()> {
        let backup = resolve_backup(&self.config.backups_path, backup_name)?;
        info!("Restoring from {:?}", backup);
        let manifest = load_manifest(&backup)?;

        let mut matched = false;
        for file in manifest.task_files.values() {
            for recorded in &file.tasks {
                if task.is_some_and(|wanted| wanted != recorded.name) {
                    continue;
                }
                matched = true;
                self.restore_task(&backup, file, recorded)?;
            }
        }
        if !matched {
            match task {
                Some(name) => bail!("task {name} is not recorded in this backup"),
                None => bail!("the manifest records no tasks"),
            }
        }
        Ok(())
    }

    fn restore_task(
        &self,
        backup: &Path,
        file: &ManifestTaskFile,
        recorded: &ManifestTask,
    ) -> Result<()> {
        if recorded.result.is_none() {
            info!("Skipping task {}: it produced no result", recorded.name);
            return Ok(());
        }
        info!("Restoring task {}", recorded.name);

        let final_path = match &file.inside {
            Some(inside) => backup.join(inside),
            None => backup.to_path_buf(),
        };
        let mut env: Env = self.config.env.clone();
        env.extend(file.env.clone());
        env.extend(recorded.env.clone());
        env.insert(
            backhaul_actions::params::BACKUP_PATH_KEY.to_owned(),
            serde_json::Value::String(final_path.to_string_lossy().into_owned()),
        );

        let def = TaskDef {
            name: recorded.name.clone(),
            env: recorded.env.clone(),
            stop_on_fail: true,
            actions: recorded.actions.clone(),
        };
        let stages = tasks::build_stages(&def, &env)?;
        TaskRunner::new(self.registry)
            .run_inverse(&recorded.name, &stages)
            .with_context(|| format!("Failed to restore task {}", recorded.name))
    }
}
