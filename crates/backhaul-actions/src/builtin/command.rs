//! The `command` action: run an arbitrary program as a pipeline stage.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::action::{ActionInput, ActionOutput};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::registry::{ActionRegistry, InputKind, OutputKind, Registration};

/// Everything needed to spawn a stage process.
#[derive(Debug, Clone)]
pub(crate) struct CommandSpec {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub(crate) fn from_args(args: Vec<String>, params: &Params) -> Result<CommandSpec> {
        let mut args = args;
        if let Some(run_as) = params.opt_str("run_as")? {
            let mut prefixed = vec!["sudo".to_owned(), "-u".to_owned(), run_as.to_owned()];
            prefixed.append(&mut args);
            args = prefixed;
        }
        Ok(CommandSpec {
            args,
            env: params.opt_str_map("env")?.unwrap_or_default(),
            cwd: params.opt_path(crate::params::BACKUP_PATH_KEY)?,
        })
    }

    /// Reads `args` (a list) or `command` (a string split shell-style).
    pub(crate) fn from_params(params: &Params) -> Result<CommandSpec> {
        let args = match params.opt_str_list("args")? {
            Some(args) if !args.is_empty() => args,
            _ => match params.opt_str("command")? {
                Some(command) => shell_words::split(command)
                    .map_err(|err| Error::invalid_param("command", err.to_string()))?,
                None => return Err(Error::missing_param("args")),
            },
        };
        CommandSpec::from_args(args, params)
    }
}

/// Spawns the process with stdout and stderr piped, feeding it the
/// stage input on stdin when there is one.
pub(crate) fn spawn(input: ActionInput, spec: CommandSpec) -> Result<ActionOutput> {
    let Some((program, rest)) = spec.args.split_first() else {
        return Err(Error::invalid_param("args", "must not be empty"));
    };
    which::which(program).map_err(|_| Error::ToolNotFound {
        tool: program.clone(),
    })?;

    let stdin = match input.into_stream_opt()? {
        Some(stream) => stream.into_stdio(),
        None => Stdio::null(),
    };

    debug!(args = ?spec.args, "spawning stage process");
    let mut command = Command::new(program);
    command
        .args(rest)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    Ok(ActionOutput::Process(command.spawn()?))
}

fn action_command(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    spawn(input, CommandSpec::from_params(params)?)
}

/// Runs the command named under `reverse`, inheriting the env and
/// working directory of the forward one.
fn inverse_command(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let reverse = params
        .opt_bag("reverse")?
        .ok_or_else(|| Error::missing_param("reverse"))?;
    let mut merged = params.clone();
    merged.remove("args");
    merged.remove("command");
    for (key, value) in reverse.iter() {
        merged.insert(key.clone(), value.clone());
    }
    spawn(input, CommandSpec::from_params(&merged)?)
}

pub fn register(registry: &mut ActionRegistry) -> Result<()> {
    registry.register(
        Registration::new("command", action_command)
            .inverse(inverse_command)
            .input(InputKind::Stream)
            .output(OutputKind::StreamProcess),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn args_take_precedence_over_command() {
        let params = Params::from_value(json!({
            "args": ["echo", "from args"],
            "command": "echo from command",
        }));
        let spec = CommandSpec::from_params(&params).unwrap();
        assert_eq!(spec.args, ["echo", "from args"]);
    }

    #[test]
    fn command_strings_split_shell_style() {
        let params = Params::from_value(json!({"command": "echo 'one word'"}));
        let spec = CommandSpec::from_params(&params).unwrap();
        assert_eq!(spec.args, ["echo", "one word"]);
    }

    #[test]
    fn run_as_prefixes_sudo() {
        let params = Params::from_value(json!({"args": ["whoami"], "run_as": "backup"}));
        let spec = CommandSpec::from_params(&params).unwrap();
        assert_eq!(spec.args, ["sudo", "-u", "backup", "whoami"]);
    }

    #[test]
    fn missing_args_and_command_is_an_error() {
        let err = CommandSpec::from_params(&Params::new()).unwrap_err();
        assert!(matches!(err, Error::MissingParam { .. }));
    }

    #[test]
    fn unknown_tools_are_reported_before_spawning() {
        let spec = CommandSpec {
            args: vec!["backhaul-no-such-tool".into()],
            env: BTreeMap::new(),
            cwd: None,
        };
        let err = spawn(ActionInput::None, spec).unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }

    #[test]
    fn spawned_process_sees_env_and_stdin() {
        let params = Params::from_value(json!({
            "args": ["sh", "-c", "cat; printf ':%s' \"$STAGE_TAG\""],
            "env": {"STAGE_TAG": "tagged"},
        }));
        let output = action_command(ActionInput::None, &params).unwrap();
        let ActionOutput::Process(mut child) = output else {
            panic!("expected a process output");
        };
        let mut stdout = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut stdout)
            .unwrap();
        assert!(child.wait().unwrap().success());
        assert_eq!(stdout, ":tagged");
    }
}
