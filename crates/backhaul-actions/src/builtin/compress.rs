//! Stream compressors built on the standard command line tools.

use crate::action::{ActionInput, ActionOutput};
use crate::builtin::command::{self, CommandSpec};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::registry::{ActionRegistry, InputKind, OutputKind, Registration};

fn level(params: &Params, default: u64, max: u64) -> Result<u64> {
    match params.opt_u64("compression_level")? {
        None => Ok(default),
        Some(level) if level <= max => Ok(level),
        Some(_) => Err(Error::invalid_param(
            "compression_level",
            format!("must be at most {max}"),
        )),
    }
}

fn xz_args(params: &Params) -> Result<Vec<String>> {
    let level = level(params, 6, 9)?;
    // -T0 lets xz pick one worker per core.
    let threads = params.opt_u64("threads")?.unwrap_or(0);
    let extra = if params.bool_or("extra_compression", false)? {
        "e"
    } else {
        ""
    };
    Ok(vec![
        "xz".into(),
        "-z".into(),
        "-c".into(),
        format!("-T{threads}"),
        format!("-{level}{extra}"),
    ])
}

fn gzip_args(params: &Params) -> Result<Vec<String>> {
    let level = level(params, 6, 9)?;
    Ok(vec!["gzip".into(), "-c".into(), format!("-{level}")])
}

fn bzip2_args(params: &Params) -> Result<Vec<String>> {
    let level = level(params, 9, 9)?;
    Ok(vec![
        "bzip2".into(),
        "-z".into(),
        "-c".into(),
        format!("-{level}"),
    ])
}

fn brotli_args(params: &Params) -> Result<Vec<String>> {
    let level = level(params, 11, 11)?;
    Ok(vec![
        "brotli".into(),
        "-c".into(),
        "-q".into(),
        level.to_string(),
    ])
}

fn decompress_args(tool: &str) -> Vec<String> {
    vec![tool.into(), "-d".into(), "-c".into()]
}

fn run(input: ActionInput, params: &Params, args: Vec<String>) -> Result<ActionOutput> {
    command::spawn(input, CommandSpec::from_args(args, params)?)
}

pub fn register(registry: &mut ActionRegistry) -> Result<()> {
    let compressors: [(&str, &str, fn(&Params) -> Result<Vec<String>>); 4] = [
        ("compress-xz", "xz", xz_args),
        ("compress-gz", "gzip", gzip_args),
        ("compress-bz2", "bzip2", bzip2_args),
        ("compress-br", "brotli", brotli_args),
    ];
    for (name, tool, builder) in compressors {
        let tool = tool.to_owned();
        registry.register(
            Registration::new(name, move |input: ActionInput, params: &Params| {
                run(input, params, builder(params)?)
            })
            .inverse(move |input: ActionInput, params: &Params| {
                run(input, params, decompress_args(&tool))
            })
            .input(InputKind::Stream)
            .output(OutputKind::StreamProcess),
        )?;
    }
    Ok(())
}
