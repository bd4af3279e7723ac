//! End-to-end backup and restore runs through the orchestrator.

use backhaul::backup::{self, BackupRunner};
use backhaul::config::Config;
use backhaul::restore::RestoreRunner;
use backhaul_actions::{register_builtin_actions, ActionRegistry};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Harness {
    _root: TempDir,
    config: Config,
    registry: ActionRegistry,
    source: PathBuf,
}

impl Harness {
    /// A workspace with a small source tree and one tasks file that
    /// archives it and copies a single file next to the archive.
    fn new() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("source");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("top.txt"), b"top level").unwrap();
        fs::write(source.join("sub/nested.txt"), b"nested").unwrap();

        let tasks_path = root.path().join("tasks");
        fs::create_dir(&tasks_path).unwrap();
        fs::write(
            tasks_path.join("system.toml"),
            format!(
                r#"
[[tasks]]
name = "tree"

[[tasks.actions]]
from-directory = {{ path = "{source}" }}

[[tasks.actions]]
tar = {{}}

[[tasks.actions]]
to-file = {{ to = "tree.tar" }}

[[tasks]]
name = "single"

[[tasks.actions]]
copy-file = {{ from = "{source}/top.txt", to = "top.txt" }}
"#,
                source = source.display(),
            ),
        )
        .unwrap();

        let config = Config {
            backups_path: root.path().join("backups"),
            tasks_path,
            env: BTreeMap::new(),
        };
        let mut registry = ActionRegistry::new();
        register_builtin_actions(&mut registry).unwrap();
        Harness {
            _root: root,
            config,
            registry,
            source,
        }
    }

    fn run_backup(&self) -> PathBuf {
        BackupRunner::new(&self.config, &self.registry)
            .run()
            .unwrap()
    }
}

#[test]
fn backup_produces_artifacts_manifest_and_current_link() {
    let h = Harness::new();
    let created = h.run_backup();

    // Timestamped directory, no leftover staging dir.
    let name = created.file_name().unwrap().to_string_lossy().into_owned();
    assert!(backup::list_backups(&h.config.backups_path)
        .unwrap()
        .contains(&name));
    assert!(!h.config.backups_path.join(".partial").exists());

    // Artifacts of both tasks.
    let archive = fs::read(created.join("tree.tar")).unwrap();
    assert!(!archive.is_empty());
    let haystack = String::from_utf8_lossy(&archive).into_owned();
    assert!(haystack.contains("top.txt"));
    assert!(haystack.contains("sub/nested.txt"));
    assert_eq!(fs::read(created.join("top.txt")).unwrap(), b"top level");

    // Manifest records relative result paths.
    let manifest = backup::load_manifest(&created).unwrap();
    let file = &manifest.task_files["system.toml"];
    let results: Vec<_> = file.tasks.iter().map(|t| t.result.clone()).collect();
    assert_eq!(
        results,
        [Some(PathBuf::from("tree.tar")), Some(PathBuf::from("top.txt"))],
    );

    // `current` points at the new backup.
    let current = fs::canonicalize(h.config.backups_path.join("current")).unwrap();
    assert_eq!(current, fs::canonicalize(&created).unwrap());
}

#[test]
fn second_backup_repoints_current() {
    let h = Harness::new();
    let first = h.run_backup();

    // Next minute boundary is too slow to wait for; rename the first
    // backup so the second gets a distinct name either way.
    let renamed = h.config.backups_path.join("2020-01-01T00:00");
    fs::remove_file(h.config.backups_path.join("current")).unwrap();
    fs::rename(&first, &renamed).unwrap();
    std::os::unix::fs::symlink(&renamed, h.config.backups_path.join("current")).unwrap();

    let second = h.run_backup();
    assert_ne!(second, renamed);
    assert_eq!(
        fs::canonicalize(h.config.backups_path.join("current")).unwrap(),
        fs::canonicalize(&second).unwrap(),
    );
    assert_eq!(backup::list_backups(&h.config.backups_path).unwrap().len(), 2);
}

#[test]
fn restore_rebuilds_the_source_tree() {
    let h = Harness::new();
    h.run_backup();

    fs::remove_dir_all(&h.source).unwrap();
    RestoreRunner::new(&h.config, &h.registry)
        .run("current", Some("tree"))
        .unwrap();

    assert_eq!(fs::read(h.source.join("top.txt")).unwrap(), b"top level");
    assert_eq!(fs::read(h.source.join("sub/nested.txt")).unwrap(), b"nested");
}

#[test]
fn restoring_an_unknown_task_is_an_error() {
    let h = Harness::new();
    h.run_backup();
    let err = RestoreRunner::new(&h.config, &h.registry)
        .run("current", Some("nope"))
        .unwrap_err();
    assert!(err.to_string().contains("not recorded"));
}

fn write_tasks(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn a_failing_task_with_stop_on_fail_aborts_and_cleans_up() {
    let h = Harness::new();
    write_tasks(
        &h.config.tasks_path,
        "broken.toml",
        r#"
[[tasks]]
name = "missing"

[[tasks.actions]]
from-file = "/backhaul/does/not/exist"

[[tasks.actions]]
to-file = { to = "never.bin" }
"#,
    );

    assert!(BackupRunner::new(&h.config, &h.registry).run().is_err());
    assert!(!h.config.backups_path.join(".partial").exists());
    assert!(backup::list_backups(&h.config.backups_path)
        .unwrap()
        .is_empty());
}

#[test]
fn a_failing_task_without_stop_on_fail_is_recorded_as_null() {
    let h = Harness::new();
    // Replaces the default tasks file entirely.
    fs::remove_file(h.config.tasks_path.join("system.toml")).unwrap();
    write_tasks(
        &h.config.tasks_path,
        "tolerant.toml",
        &format!(
            r#"
[[tasks]]
name = "missing"
stop_on_fail = false

[[tasks.actions]]
from-file = "/backhaul/does/not/exist"

[[tasks.actions]]
to-file = {{ to = "never.bin" }}

[[tasks]]
name = "single"

[[tasks.actions]]
copy-file = {{ from = "{source}/top.txt", to = "top.txt" }}
"#,
            source = h.source.display(),
        ),
    );

    let created = h.run_backup();
    let manifest = backup::load_manifest(&created).unwrap();
    let file = &manifest.task_files["tolerant.toml"];
    assert_eq!(file.tasks[0].result, None);
    assert_eq!(file.tasks[1].result, Some(PathBuf::from("top.txt")));
    assert!(!created.join("never.bin").exists());
}

#[test]
fn env_placeholders_reach_action_params() {
    let h = Harness::new();
    fs::remove_file(h.config.tasks_path.join("system.toml")).unwrap();
    write_tasks(
        &h.config.tasks_path,
        "env.toml",
        &format!(
            r#"
[env]
SOURCE = "{source}"

[[tasks]]
name = "named"

[[tasks.actions]]
copy-file = {{ from = "${{SOURCE}}/top.txt", to = "from-env.txt" }}
"#,
            source = h.source.display(),
        ),
    );

    let created = h.run_backup();
    assert_eq!(fs::read(created.join("from-env.txt")).unwrap(), b"top level");
}
