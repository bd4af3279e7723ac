//! GnuPG encryption for backup streams.

use std::io::Write;
use std::os::fd::AsRawFd;

use crate::action::{ActionInput, ActionOutput};
use crate::builtin::command::{self, CommandSpec};
use crate::error::Result;
use crate::params::Params;
use crate::registry::{ActionRegistry, InputKind, OutputKind, Registration};

/// Hands the passphrase to gpg over an inherited pipe so it never
/// appears in the argument list. The returned reader must stay open
/// until the process has been spawned.
fn passphrase_fd(args: &mut Vec<String>, passphrase: &str) -> Result<os_pipe::PipeReader> {
    let (reader, mut writer) = os_pipe::pipe()?;
    writer.write_all(passphrase.as_bytes())?;
    writer.write_all(b"\n")?;
    drop(writer);

    // Clear CLOEXEC so the fd survives into the child.
    let fd = reader.as_raw_fd();
    if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    args.extend([
        "--pinentry-mode".into(),
        "loopback".into(),
        "--passphrase-fd".into(),
        fd.to_string(),
    ]);
    Ok(reader)
}

fn encrypt_args(params: &Params) -> Result<Vec<String>> {
    let mut args: Vec<String> = vec!["gpg".into(), "--output".into(), "-".into(), "--batch".into()];
    let recipients = params.opt_str_list("recipients")?.unwrap_or_default();
    for recipient in &recipients {
        args.extend(["-r".into(), recipient.clone()]);
    }
    if recipients.is_empty() {
        args.push("--symmetric".into());
    }
    if let Some(algorithm) = params.opt_str("cipher_algorithm")? {
        args.extend(["--cipher-algo".into(), algorithm.to_owned()]);
    }
    let compress = params.opt_str("compress_algorithm")?.unwrap_or("uncompressed");
    args.extend(["--compress-algo".into(), compress.to_owned()]);
    Ok(args)
}

fn decrypt_args(params: &Params) -> Result<Vec<String>> {
    let mut args: Vec<String> = vec![
        "gpg".into(),
        "--output".into(),
        "-".into(),
        "--batch".into(),
        "-d".into(),
    ];
    for recipient in params.opt_str_list("recipients")?.unwrap_or_default() {
        args.extend(["-r".into(), recipient]);
    }
    Ok(args)
}

fn run_gpg(input: ActionInput, params: &Params, mut args: Vec<String>) -> Result<ActionOutput> {
    let passphrase_reader = match params.opt_str("passphrase")? {
        Some(passphrase) => Some(passphrase_fd(&mut args, passphrase)?),
        None => None,
    };
    args.push("-".into());
    let output = command::spawn(input, CommandSpec::from_args(args, params)?)?;
    drop(passphrase_reader);
    Ok(output)
}

fn action_encrypt_gpg(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    run_gpg(input, params, encrypt_args(params)?)
}

fn inverse_encrypt_gpg(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    run_gpg(input, params, decrypt_args(params)?)
}

pub fn register(registry: &mut ActionRegistry) -> Result<()> {
    registry.register(
        Registration::new("encrypt-gpg", action_encrypt_gpg)
            .inverse(inverse_encrypt_gpg)
            .input(InputKind::Stream)
            .output(OutputKind::StreamProcess),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn symmetric_is_the_default_without_recipients() {
        let args = encrypt_args(&Params::new()).unwrap();
        assert_eq!(
            args,
            ["gpg", "--output", "-", "--batch", "--symmetric", "--compress-algo", "uncompressed"],
        );
    }

    #[test]
    fn recipients_replace_symmetric_mode() {
        let params = Params::from_value(json!({
            "recipients": ["backups@example.com"],
            "cipher_algorithm": "AES256",
            "compress_algorithm": "zlib",
        }));
        let args = encrypt_args(&params).unwrap();
        assert_eq!(
            args,
            [
                "gpg",
                "--output",
                "-",
                "--batch",
                "-r",
                "backups@example.com",
                "--cipher-algo",
                "AES256",
                "--compress-algo",
                "zlib",
            ],
        );
    }

    #[test]
    fn decrypt_args_mirror_the_recipients() {
        let params = Params::from_value(json!({"recipients": ["a@b.c"]}));
        assert_eq!(
            decrypt_args(&params).unwrap(),
            ["gpg", "--output", "-", "--batch", "-d", "-r", "a@b.c"],
        );
    }
}
