//! Structured process execution.
//!
//! Every external command gitkit issues goes through [`ProcessRunner`] as a
//! [`CommandSpec`] (program plus argument vector). Nothing is ever joined into
//! a shell string, so revision names and paths reach the child verbatim.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

use crate::types::Credential;

/// Errors returned by the process runner.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The command exited nonzero, or wrote diagnostics that were not ignored.
    #[error("`{command}` failed: {stderr}")]
    Command {
        command: String,
        /// Exit code, `None` when the child was killed by a signal.
        status: Option<i32>,
        stderr: String,
    },
    /// The working directory does not exist.
    #[error("working directory not found: {}", .0.display())]
    Directory(PathBuf),
    /// Captured output exceeded the configured cap.
    #[error("`{command}` produced more than {limit} bytes of output")]
    OutputTooLarge { command: String, limit: usize },
    /// The command could not be spawned or its pipes could not be read.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// A program and its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub credential: Option<Credential>,
    /// Do not treat diagnostic output as failure. It is still logged.
    pub ignore_stderr: bool,
    pub max_output: Option<usize>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn credential(mut self, credential: Option<&Credential>) -> Self {
        self.credential = credential.cloned();
        self
    }

    pub fn ignore_stderr(mut self) -> Self {
        self.ignore_stderr = true;
        self
    }

    pub fn max_output(mut self, limit: usize) -> Self {
        self.max_output = Some(limit);
        self
    }
}

/// Executes structured commands and returns their captured stdout.
pub trait ProcessRunner {
    fn execute(&self, spec: &CommandSpec, opts: &ExecOptions) -> Result<Vec<u8>, ExecError>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    /// Build a Command with the non-interactive environment applied.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `GIT_SSH_COMMAND` - only when a credential is given, scoped to this child
    fn command(spec: &CommandSpec, opts: &ExecOptions) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(Credential::SshKey(key)) = &opts.credential {
            cmd.env("GIT_SSH_COMMAND", ssh_command(key));
        }
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

impl ProcessRunner for SystemRunner {
    fn execute(&self, spec: &CommandSpec, opts: &ExecOptions) -> Result<Vec<u8>, ExecError> {
        if let Some(cwd) = &opts.cwd {
            if !cwd.is_dir() {
                return Err(ExecError::Directory(cwd.clone()));
            }
        }

        let io_err = |source: std::io::Error| ExecError::Spawn {
            command: spec.to_string(),
            source,
        };

        log::debug!("exec: {}", spec);
        let mut child = Self::command(spec, opts).spawn().map_err(io_err)?;

        // Drain stderr on its own thread so a chatty child cannot block on a
        // full pipe while we are reading stdout.
        let stderr_pipe = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });

        let mut stdout = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            let read = match opts.max_output {
                Some(limit) => pipe
                    .take((limit as u64).saturating_add(1))
                    .read_to_end(&mut stdout),
                None => {
                    let mut pipe = pipe;
                    pipe.read_to_end(&mut stdout)
                }
            };
            if let Err(e) = read {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io_err(e));
            }
        }

        if let Some(limit) = opts.max_output {
            if stdout.len() > limit {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stderr_reader.join();
                return Err(ExecError::OutputTooLarge {
                    command: spec.to_string(),
                    limit,
                });
            }
        }

        let status = child.wait().map_err(io_err)?;
        let stderr = stderr_reader.join().unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

        if !status.success() {
            return Err(ExecError::Command {
                command: spec.to_string(),
                status: status.code(),
                stderr,
            });
        }

        if !stderr.is_empty() {
            if opts.ignore_stderr {
                log::warn!("{}: {}", spec, stderr);
            } else {
                return Err(ExecError::Command {
                    command: spec.to_string(),
                    status: status.code(),
                    stderr,
                });
            }
        }

        Ok(stdout)
    }
}

/// `GIT_SSH_COMMAND` value pinning ssh to a single key.
fn ssh_command(key: &Path) -> String {
    format!(
        "ssh -i {} -o IdentitiesOnly=yes -o BatchMode=yes",
        shell_quote(&key.to_string_lossy())
    )
}

/// git runs `GIT_SSH_COMMAND` through `sh`, so the key path must be quoted.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("git").args(["checkout", "-qf"]).arg("main");
        assert_eq!(spec.to_string(), "git checkout -qf main");
        assert_eq!(spec.program(), "git");
        assert_eq!(spec.arguments().len(), 3);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/tmp/my key"), "'/tmp/my key'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn ssh_command_names_key() {
        let cmd = ssh_command(Path::new("/keys/deploy"));
        assert!(cmd.starts_with("ssh -i '/keys/deploy'"));
        assert!(cmd.contains("IdentitiesOnly=yes"));
    }

    #[test]
    fn missing_cwd_is_directory_error() {
        let temp = tempdir().expect("Failed to create temp directory");
        let missing = temp.path().join("never");
        let result = SystemRunner.execute(
            &CommandSpec::new("cat").arg("abc"),
            &ExecOptions::new().cwd(&missing),
        );
        match result {
            Err(ExecError::Directory(path)) => assert_eq!(path, missing),
            other => panic!("Expected Directory error, got: {:?}", other),
        }
    }

    #[test]
    fn unknown_program_is_spawn_error() {
        let temp = tempdir().expect("Failed to create temp directory");
        let result = SystemRunner.execute(
            &CommandSpec::new("what-is-this-command"),
            &ExecOptions::new().cwd(temp.path()),
        );
        assert!(matches!(result, Err(ExecError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn returns_stdout_on_success() {
        let out = SystemRunner
            .execute(&sh("printf hello"), &ExecOptions::new())
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_command_error() {
        let result = SystemRunner.execute(&sh("echo bad >&2; exit 3"), &ExecOptions::new());
        match result {
            Err(ExecError::Command { status, stderr, .. }) => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "bad");
            }
            other => panic!("Expected Command error, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_fails_even_when_stderr_ignored() {
        let result = SystemRunner.execute(&sh("exit 1"), &ExecOptions::new().ignore_stderr());
        assert!(matches!(result, Err(ExecError::Command { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn stderr_fails_unless_ignored() {
        let spec = sh("echo warning >&2; printf ok");
        let strict = SystemRunner.execute(&spec, &ExecOptions::new());
        assert!(matches!(
            strict,
            Err(ExecError::Command { status: Some(0), .. })
        ));

        let lenient = SystemRunner
            .execute(&spec, &ExecOptions::new().ignore_stderr())
            .unwrap();
        assert_eq!(lenient, b"ok");
    }

    #[cfg(unix)]
    #[test]
    fn output_over_cap_is_rejected() {
        let result = SystemRunner.execute(&sh("printf 0123456789"), &ExecOptions::new().max_output(4));
        match result {
            Err(ExecError::OutputTooLarge { limit, .. }) => assert_eq!(limit, 4),
            other => panic!("Expected OutputTooLarge, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn output_at_cap_is_accepted() {
        let out = SystemRunner
            .execute(&sh("printf 0123"), &ExecOptions::new().max_output(4))
            .unwrap();
        assert_eq!(out, b"0123");
    }

    #[cfg(unix)]
    #[test]
    fn largest_cap_reads_everything() {
        let out = SystemRunner
            .execute(&sh("printf hello"), &ExecOptions::new().max_output(usize::MAX))
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn large_output_over_cap_does_not_hang() {
        let spec = sh("i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done");
        let result = SystemRunner.execute(&spec, &ExecOptions::new().max_output(1024));
        assert!(matches!(result, Err(ExecError::OutputTooLarge { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn credential_is_scoped_to_the_child() {
        let opts = ExecOptions::new().credential(Some(&Credential::SshKey("/keys/deploy".into())));
        let out = SystemRunner
            .execute(&sh("printf '%s' \"$GIT_SSH_COMMAND\""), &opts)
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("-i '/keys/deploy'"), "got {}", out);

        let without = SystemRunner
            .execute(&sh("printf '%s' \"${GIT_SSH_COMMAND:-unset}\""), &ExecOptions::new())
            .unwrap();
        // Only meaningful when the test environment does not set it already.
        if std::env::var_os("GIT_SSH_COMMAND").is_none() {
            assert_eq!(without, b"unset");
        }
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_working_directory() {
        let temp = tempdir().expect("Failed to create temp directory");
        std::fs::write(temp.path().join("marker"), "x").unwrap();
        let out = SystemRunner
            .execute(&sh("ls"), &ExecOptions::new().cwd(temp.path()))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "marker");
    }
}
