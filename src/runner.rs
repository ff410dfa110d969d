use anyhow::{Context, Result};
use converge::CommandRequest;
use metadata::CommandLine;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

/// Run a command and inherit stdio (shows output in real-time)
pub fn run(cmd: &str, args: &[&str]) -> Result<ExitStatus> {
    log::debug!("Running: {} {}", cmd, args.join(" "));
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
}

/// Run a command, failing unless it exits successfully
pub fn run_checked(cmd: &str, args: &[&str]) -> Result<()> {
    let status = run(cmd, args)?;
    if !status.success() {
        anyhow::bail!("{} {} exited with {}", cmd, args.join(" "), status);
    }
    Ok(())
}

/// Run a command and capture output
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Command failed: {}", stderr.trim())
    }
}

/// Run a command silently, returning success/failure
pub fn run_quiet(cmd: &str, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Build the process for a metadata command.
///
/// A shell string goes through `sh -c` (`cmd /C` on Windows); an argv list
/// runs directly. `env` is layered over the inherited environment and `cwd`
/// may start with `~`.
pub fn metadata_command(request: &CommandRequest<'_>) -> Result<Command> {
    let mut command = match request.line {
        CommandLine::Shell(line) => shell(line),
        CommandLine::Argv(argv) => {
            let (program, args) = argv
                .split_first()
                .context("Command has an empty argument list")?;
            let mut command = Command::new(program);
            command.args(args);
            command
        }
    };

    command.envs(request.env);
    if let Some(cwd) = request.cwd {
        command.current_dir(expand(cwd));
    }
    command.stdin(Stdio::null());
    Ok(command)
}

/// Exit code of a finished process; a signal death counts as failure
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(not(windows))]
fn shell(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn shell(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(line);
    command
}

fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn output_of(request: &CommandRequest<'_>) -> String {
        let output = metadata_command(request).unwrap().output().unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[test]
    fn test_shell_line_sees_merged_env() {
        let line = CommandLine::Shell("echo \"$MAGIC\" && test -n \"$PATH\" && echo path".into());
        let env: IndexMap<String, String> =
            [("MAGIC".to_string(), "from metadata".to_string())].into_iter().collect();

        let out = output_of(&CommandRequest::new(&line, &env, None));
        assert_eq!(out, "from metadata\npath");
    }

    #[test]
    fn test_argv_runs_in_cwd() {
        let temp = TempDir::new().unwrap();
        let line = CommandLine::Argv(vec!["pwd".to_string()]);
        let env = IndexMap::new();
        let cwd = temp.path().to_string_lossy().into_owned();

        let out = output_of(&CommandRequest::new(&line, &env, Some(&cwd)));
        let expected = temp.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(out).canonicalize().unwrap(), expected);
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        let line = CommandLine::Argv(Vec::new());
        let env = IndexMap::new();
        assert!(metadata_command(&CommandRequest::new(&line, &env, None)).is_err());
    }

    #[test]
    fn test_exit_code() {
        let line = CommandLine::Shell("exit 7".into());
        let env = IndexMap::new();
        let status = metadata_command(&CommandRequest::new(&line, &env, None))
            .unwrap()
            .status()
            .unwrap();
        assert_eq!(exit_code(status), 7);
    }
}
