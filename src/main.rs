mod cli;

use backhaul::{backup, config, restore, tasks};
use backhaul_actions::{register_builtin_actions, verify_chain, ActionRegistry};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "backhaul=trace,backhaul_actions=trace".to_string()
        } else {
            "backhaul=info,backhaul_actions=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Backup => run_backup(cli.config.as_deref()),
        Commands::Restore { backup, task } => {
            run_restore(cli.config.as_deref(), &backup, task.as_deref())
        }
        Commands::List => list(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate(path.as_deref())
        }
        Commands::ListActions => list_actions(),
        Commands::Version => {
            println!("backhaul {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn registry() -> Result<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    register_builtin_actions(&mut registry)?;
    Ok(registry)
}

fn run_backup(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = registry()?;
    let created = backup::BackupRunner::new(&config, &registry).run()?;
    println!("Backup created at {}", created.display());
    Ok(())
}

fn run_restore(config_path: Option<&Path>, backup_name: &str, task: Option<&str>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = registry()?;
    restore::RestoreRunner::new(&config, &registry).run(backup_name, task)
}

fn list(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    for name in backup::list_backups(&config.backups_path)? {
        println!("{name}");
    }
    Ok(())
}

fn validate(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = registry()?;

    let mut failures = 0usize;
    for path in tasks::discover(&config.tasks_path)? {
        let file = match tasks::load_task_file(&path) {
            Ok(file) => file,
            Err(err) => {
                println!("FAIL {}: {err:#}", path.display());
                failures += 1;
                continue;
            }
        };
        for task in &file.tasks {
            let stages = tasks::build_stages(task, &tasks::Env::new())?;
            match verify_chain(&registry, &stages) {
                Ok(()) => println!("ok   {} :: {}", path.display(), task.name),
                Err(err) => {
                    println!("FAIL {} :: {}: {err}", path.display(), task.name);
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} task(s) failed validation");
    }
    println!("Configuration is valid");
    Ok(())
}

fn list_actions() -> Result<()> {
    let registry = registry()?;
    for name in registry.names() {
        let (input, output, reversible) = registry.describe(name)?;
        let input = input.map(|k| k.as_str()).unwrap_or("none");
        let output = output.map(|k| k.as_str()).unwrap_or("none");
        let tag = if reversible { "  [reversible]" } else { "" };
        println!("{name:<20} {input:>9} -> {output}{tag}");
    }
    Ok(())
}
