//! Update protocol: bring a working copy to a revision.
//!
//! Stages run as ordered step lists, stopping at the first failure:
//!
//! 1. clean: prune stale remote-tracking refs, compact storage
//! 2. sync: force checkout, pull, hard reset to `origin/<rev>`, fetch tags
//!
//! If clean or sync fails with a command error, the repair stage rebuilds the
//! local branch from the remote and sync is retried once. A failure during
//! repair or during the retry is returned as is.

use crate::runner::ExecOptions;
use crate::types::validate_ref;

use super::{GitError, ProcessRunner, Readiness, Repo};

/// How [`Repo::update`] reached the revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    FastPath,
    /// The branch was rebuilt from the remote before sync succeeded.
    Repaired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    args: Vec<String>,
    tolerate_failure: bool,
}

impl Step {
    fn new(args: &[&str]) -> Self {
        Self {
            args: args.iter().map(|a| a.to_string()).collect(),
            tolerate_failure: false,
        }
    }

    fn tolerated(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }
}

fn clean_steps() -> Vec<Step> {
    vec![
        Step::new(&["remote", "prune", "origin"]),
        Step::new(&["gc", "-q"]),
    ]
}

fn sync_steps(rev: &str) -> Vec<Step> {
    let upstream = format!("origin/{}", rev);
    vec![
        Step::new(&["checkout", "-qf", rev]),
        Step::new(&["pull", "-q"]),
        Step::new(&["reset", "-q", "--hard", upstream.as_str()]),
        Step::new(&["fetch", "-q", "--tags"]),
    ]
}

fn repair_steps(rev: &str, scratch: &str) -> Vec<Step> {
    let upstream = format!("origin/{}", rev);
    vec![
        // Move off `rev` so it can be deleted.
        Step::new(&["checkout", "-q", "-B", scratch]),
        // There may be no local branch to delete.
        Step::new(&["branch", "-D", rev]).tolerated(),
        Step::new(&["remote", "update"]),
        Step::new(&["fetch", "-q", "origin", rev]),
        Step::new(&["checkout", "-q", "-B", rev, upstream.as_str()]),
        Step::new(&["branch", "-D", scratch]),
    ]
}

impl<R: ProcessRunner> Repo<'_, R> {
    /// Drive the working copy to `rev`.
    ///
    /// Requires a credential; nothing runs without one. Running it again on a
    /// copy already at `rev` changes nothing.
    pub fn update(&self, rev: &str) -> Result<UpdateOutcome, GitError> {
        let credential = self.require_credential()?;
        validate_ref(rev)?;
        let scratch = self.config().scratch_branch();
        if scratch == rev {
            return Err(GitError::InvalidInput(format!(
                "revision {:?} collides with the scratch branch",
                rev
            )));
        }

        let opts = self.transport(credential);
        let first = self
            .run_steps("clean", &clean_steps(), &opts)
            .and_then(|()| self.run_steps("sync", &sync_steps(rev), &opts));

        match first {
            Ok(()) => {
                log::debug!("{} is at {}", self.path().display(), rev);
                Ok(UpdateOutcome::FastPath)
            }
            Err(err) if err.is_recoverable() => {
                log::warn!(
                    "updating {} to {} failed, rebuilding the branch: {}",
                    self.path().display(),
                    rev,
                    err
                );
                self.run_steps("repair", &repair_steps(rev, scratch), &opts)?;
                self.run_steps("sync", &sync_steps(rev), &opts)?;
                log::info!("{} repaired and at {}", self.path().display(), rev);
                Ok(UpdateOutcome::Repaired)
            }
            Err(err) => Err(err),
        }
    }

    /// Make sure a usable copy of `remote` exists, then update it to `rev`.
    pub fn sync(&self, remote: &str, rev: &str) -> Result<UpdateOutcome, GitError> {
        self.require_credential()?;
        match self.check_ready(remote)? {
            Readiness::Ready => {}
            Readiness::Reset | Readiness::NeedsClone => self.clone(remote)?,
        }
        self.update(rev)
    }

    fn run_steps(&self, stage: &str, steps: &[Step], opts: &ExecOptions) -> Result<(), GitError> {
        for step in steps {
            match self.run(step.args.iter().cloned(), opts) {
                Ok(_) => {}
                Err(err) if step.tolerate_failure && err.is_recoverable() => {
                    log::debug!("{}: ignoring failed `{}`: {}", stage, step.args.join(" "), err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::repo::GitKit;
    use crate::runner::ExecError;
    use crate::test_support::{
        ScriptedRunner, command_failure, commit_all, git, init_repo, require_git, scripted_kit,
        test_credential,
    };
    use crate::types::Credential;
    use std::cell::Cell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use tempfile::tempdir;

    const CLEAN: [&str; 2] = ["remote prune origin", "gc -q"];
    const SYNC: [&str; 4] = [
        "checkout -qf main",
        "pull -q",
        "reset -q --hard origin/main",
        "fetch -q --tags",
    ];
    const REPAIR: [&str; 6] = [
        "checkout -q -B gitkit-scratch",
        "branch -D main",
        "remote update",
        "fetch -q origin main",
        "checkout -q -B main origin/main",
        "branch -D gitkit-scratch",
    ];

    fn expected(stages: &[&[&str]]) -> Vec<String> {
        stages
            .iter()
            .flat_map(|s| s.iter().map(|c| c.to_string()))
            .collect()
    }

    /// Fails `target` the first `times` times it runs.
    fn fail_first(target: &'static str, times: usize) -> ScriptedRunner {
        let seen = Rc::new(Cell::new(0));
        ScriptedRunner::new(move |cmd| {
            if cmd == target && seen.get() < times {
                seen.set(seen.get() + 1);
                Err(command_failure(cmd))
            } else {
                Ok(String::new())
            }
        })
    }

    #[test]
    fn fast_path_runs_clean_then_sync() {
        let kit = scripted_kit(ScriptedRunner::ok());
        let outcome = kit.repo("/srv/copy").update("main").unwrap();

        assert_eq!(outcome, UpdateOutcome::FastPath);
        assert_eq!(kit.runner().commands(), expected(&[&CLEAN[..], &SYNC[..]]));
    }

    #[test]
    fn every_step_carries_the_credential() {
        let kit = scripted_kit(ScriptedRunner::ok());
        kit.repo("/srv/copy").update("main").unwrap();

        for opts in kit.runner().options() {
            assert_eq!(opts.credential, Some(test_credential()));
            assert_eq!(opts.cwd.as_deref(), Some(Path::new("/srv/copy")));
        }
    }

    #[test]
    fn failed_pull_repairs_and_retries_once() {
        let kit = scripted_kit(fail_first("pull -q", 1));
        let outcome = kit.repo("/srv/copy").update("main").unwrap();

        assert_eq!(outcome, UpdateOutcome::Repaired);
        assert_eq!(
            kit.runner().commands(),
            expected(&[&CLEAN[..], &SYNC[..2], &REPAIR[..], &SYNC[..]])
        );
    }

    #[test]
    fn failed_clean_also_repairs() {
        let kit = scripted_kit(fail_first("remote prune origin", 1));
        let outcome = kit.repo("/srv/copy").update("main").unwrap();

        assert_eq!(outcome, UpdateOutcome::Repaired);
        assert_eq!(
            kit.runner().commands(),
            expected(&[&CLEAN[..1], &REPAIR[..], &SYNC[..]])
        );
    }

    #[test]
    fn missing_local_branch_is_tolerated() {
        let seen = Rc::new(Cell::new(false));
        let flag = seen.clone();
        let kit = scripted_kit(ScriptedRunner::new(move |cmd| match cmd {
            "checkout -qf main" if !flag.get() => {
                flag.set(true);
                Err(command_failure(cmd))
            }
            "branch -D main" => Err(command_failure(cmd)),
            _ => Ok(String::new()),
        }));

        let outcome = kit.repo("/srv/copy").update("main").unwrap();
        assert_eq!(outcome, UpdateOutcome::Repaired);
        assert!(seen.get());
    }

    #[test]
    fn repair_failure_is_fatal() {
        let kit = scripted_kit(ScriptedRunner::new(|cmd| match cmd {
            "pull -q" | "fetch -q origin main" => Err(command_failure(cmd)),
            _ => Ok(String::new()),
        }));
        let result = kit.repo("/srv/copy").update("main");

        assert!(matches!(result, Err(GitError::Command(_))));
        let commands = kit.runner().commands();
        assert_eq!(commands.last().map(String::as_str), Some("fetch -q origin main"));
        assert!(!commands.contains(&"checkout -q -B main origin/main".to_string()));
    }

    #[test]
    fn retry_failure_propagates_without_second_repair() {
        let kit = scripted_kit(ScriptedRunner::new(|cmd| match cmd {
            "pull -q" => Err(command_failure(cmd)),
            _ => Ok(String::new()),
        }));
        let result = kit.repo("/srv/copy").update("main");

        assert!(matches!(result, Err(GitError::Command(_))));
        assert_eq!(
            kit.runner().commands(),
            expected(&[&CLEAN[..], &SYNC[..2], &REPAIR[..], &SYNC[..2]])
        );
    }

    #[test]
    fn directory_error_is_not_repaired() {
        let kit = scripted_kit(ScriptedRunner::new(|_| {
            Err(ExecError::Directory(PathBuf::from("/srv/copy")))
        }));
        let result = kit.repo("/srv/copy").update("main");

        assert!(matches!(result, Err(GitError::Directory(_))));
        assert_eq!(kit.runner().commands().len(), 1);
    }

    #[test]
    fn spawn_failure_is_not_repaired() {
        let kit = scripted_kit(ScriptedRunner::new(|cmd| {
            Err(ExecError::Spawn {
                command: format!("git {}", cmd),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }));
        let result = kit.repo("/srv/copy").update("main");

        assert!(matches!(result, Err(GitError::Spawn { .. })));
        assert_eq!(kit.runner().commands(), ["remote prune origin"]);
    }

    #[test]
    fn missing_git_binary_fails_without_repair() {
        let temp = tempdir().expect("Failed to create temp directory");
        let config = Config::default()
            .with_credential(test_credential())
            .with_git_program("gitkit-no-such-git");
        let kit = GitKit::new(config);

        let result = kit.repo(temp.path()).update("main");
        assert!(matches!(result, Err(GitError::Spawn { .. })));
    }

    #[test]
    fn missing_credential_runs_nothing() {
        let kit = GitKit::with_runner(ScriptedRunner::ok(), Config::default());
        let repo = kit.repo("/srv/copy");

        assert!(matches!(repo.update("main"), Err(GitError::MissingCredential)));
        assert!(matches!(
            repo.sync("git@example.com:a/b.git", "main"),
            Err(GitError::MissingCredential)
        ));
        assert!(kit.runner().commands().is_empty());
    }

    #[test]
    fn invalid_revision_runs_nothing() {
        let kit = scripted_kit(ScriptedRunner::ok());
        let repo = kit.repo("/srv/copy");

        assert!(matches!(repo.update("--all"), Err(GitError::InvalidInput(_))));
        assert!(matches!(
            repo.update("gitkit-scratch"),
            Err(GitError::InvalidInput(_))
        ));
        assert!(kit.runner().commands().is_empty());
    }

    #[test]
    fn sync_clones_into_fresh_copy() {
        let temp = tempdir().unwrap();
        let copy = temp.path().join("copy");
        let kit = scripted_kit(ScriptedRunner::ok());

        let outcome = kit
            .repo(&copy)
            .sync("git@example.com:a/b.git", "main")
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::FastPath);
        assert_eq!(
            kit.runner().commands()[0],
            "clone -q -- git@example.com:a/b.git ."
        );
        assert_eq!(kit.runner().commands().len(), 1 + CLEAN.len() + SYNC.len());
    }

    /// A bare remote seeded with one commit on `main`, and a clone of it.
    fn real_fixture(root: &Path) -> (String, PathBuf) {
        let seed = root.join("seed");
        init_repo(&seed);
        std::fs::write(seed.join("README.md"), "# github-test\n").unwrap();
        commit_all(&seed, "seed");

        let bare = root.join("remote.git");
        git(root, &["clone", "-q", "--bare", "seed", "remote.git"]);
        let remote = bare.to_string_lossy().into_owned();

        let copy = root.join("copy");
        (remote, copy)
    }

    fn real_kit() -> GitKit {
        GitKit::new(Config::default().with_credential(Credential::SshKey("/nonexistent/key".into())))
    }

    #[test]
    fn real_git_update_is_idempotent() {
        if !require_git() {
            return;
        }
        let temp = tempdir().expect("Failed to create temp directory");
        let (remote, copy) = real_fixture(temp.path());
        let kit = real_kit();
        let repo = kit.repo(&copy);

        assert_eq!(repo.sync(&remote, "main").unwrap(), UpdateOutcome::FastPath);
        let head = git(&copy, &["rev-parse", "HEAD"]);

        assert_eq!(repo.update("main").unwrap(), UpdateOutcome::FastPath);
        assert_eq!(git(&copy, &["rev-parse", "HEAD"]), head);
        assert_eq!(git(&copy, &["status", "--porcelain"]), "");
        assert_eq!(repo.check_ready(&remote).unwrap(), Readiness::Ready);
    }

    #[test]
    fn real_git_update_follows_remote_and_discards_local_edits() {
        if !require_git() {
            return;
        }
        let temp = tempdir().expect("Failed to create temp directory");
        let (remote, copy) = real_fixture(temp.path());
        let kit = real_kit();
        let repo = kit.repo(&copy);
        repo.sync(&remote, "main").unwrap();

        let seed = temp.path().join("seed");
        std::fs::write(seed.join("abc"), "").unwrap();
        let tip = commit_all(&seed, "add abc");
        git(&seed, &["push", "-q", remote.as_str(), "main"]);

        std::fs::write(copy.join("README.md"), "scribbled\n").unwrap();
        assert_eq!(repo.update("main").unwrap(), UpdateOutcome::FastPath);

        assert_eq!(git(&copy, &["rev-parse", "HEAD"]), tip);
        assert_eq!(
            std::fs::read_to_string(copy.join("README.md")).unwrap(),
            "# github-test\n"
        );
    }

    #[test]
    fn real_git_broken_branch_is_rebuilt() {
        if !require_git() {
            return;
        }
        let temp = tempdir().expect("Failed to create temp directory");
        let (remote, copy) = real_fixture(temp.path());
        let kit = real_kit();
        let repo = kit.repo(&copy);
        repo.sync(&remote, "main").unwrap();
        let upstream_tip = git(&copy, &["rev-parse", "origin/main"]);

        // A local-only commit on a branch that no longer tracks anything.
        std::fs::write(copy.join("local.txt"), "diverged\n").unwrap();
        commit_all(&copy, "local only");
        git(&copy, &["branch", "--unset-upstream"]);

        assert_eq!(repo.update("main").unwrap(), UpdateOutcome::Repaired);
        assert_eq!(git(&copy, &["rev-parse", "HEAD"]), upstream_tip);
        assert_eq!(git(&copy, &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
        assert!(!copy.join("local.txt").exists());
        assert_eq!(git(&copy, &["branch", "--list", "gitkit-scratch"]), "");

        // The rebuilt branch tracks origin again, so the next run is clean.
        assert_eq!(repo.update("main").unwrap(), UpdateOutcome::FastPath);
    }
}
