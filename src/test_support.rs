//! Helpers shared by the unit tests.

use std::cell::RefCell;
use std::path::Path;
use std::process::Command;

use crate::config::Config;
use crate::repo::GitKit;
use crate::runner::{CommandSpec, ExecError, ExecOptions, ProcessRunner};
use crate::types::Credential;

type Responder = Box<dyn Fn(&str) -> Result<String, ExecError>>;

/// Fake runner that answers from a closure and records every call.
///
/// The closure sees the git arguments after the hook-disabling prefix, joined
/// with single spaces, e.g. `"checkout -qf main"`.
pub struct ScriptedRunner {
    respond: Responder,
    calls: RefCell<Vec<(CommandSpec, ExecOptions)>>,
}

impl ScriptedRunner {
    pub fn new(respond: impl Fn(&str) -> Result<String, ExecError> + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Every command succeeds with empty output.
    pub fn ok() -> Self {
        Self::new(|_| Ok(String::new()))
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.borrow().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn options(&self) -> Vec<ExecOptions> {
        self.calls.borrow().iter().map(|(_, o)| o.clone()).collect()
    }

    /// Recorded calls in the same form the responder receives.
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|(spec, _)| command_line(spec))
            .collect()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn execute(&self, spec: &CommandSpec, opts: &ExecOptions) -> Result<Vec<u8>, ExecError> {
        self.calls.borrow_mut().push((spec.clone(), opts.clone()));
        (self.respond)(&command_line(spec)).map(String::into_bytes)
    }
}

fn command_line(spec: &CommandSpec) -> String {
    let args = spec.arguments();
    let args = match args {
        [c, hooks, rest @ ..] if c == "-c" && hooks == "core.hooksPath=" => rest,
        _ => args,
    };
    args.join(" ")
}

/// The failure a real runner reports for a nonzero exit.
pub fn command_failure(command: &str) -> ExecError {
    ExecError::Command {
        command: format!("git {}", command),
        status: Some(1),
        stderr: "fatal: scripted failure".into(),
    }
}

pub fn test_credential() -> Credential {
    Credential::SshKey("/keys/test-deploy".into())
}

/// Kit over a scripted runner with a credential configured.
pub fn scripted_kit(runner: ScriptedRunner) -> GitKit<ScriptedRunner> {
    GitKit::with_runner(runner, Config::default().with_credential(test_credential()))
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Tests that drive a real git binary skip themselves when none is installed.
pub fn require_git() -> bool {
    if git_available() {
        true
    } else {
        eprintln!("skipping test: git not found on PATH");
        false
    }
}

/// Run git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=gitkit",
            "-c",
            "user.email=gitkit@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create a repository at `dir` whose only branch is `main`.
pub fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).expect("Failed to create repo dir");
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
}

/// Commit everything in `dir` and return the new commit id.
pub fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A", "."]);
    git(dir, &["commit", "-q", "--allow-empty", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Sorted listing of a directory tree (relative paths), excluding `.git`.
pub fn snapshot(dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_name() == ".git" {
                continue;
            }
            let rel = path.strip_prefix(base).unwrap().to_string_lossy().into_owned();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                let content = std::fs::read(&path).unwrap_or_default();
                out.push(format!("{} {}", rel, content.len()));
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}
