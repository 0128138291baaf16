use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use gitkit::config::{Config, parse_size};
use gitkit::lock::{DEFAULT_LOCK_TIMEOUT, WorkingCopyLock};
use gitkit::paths::StatePaths;
use gitkit::types::{Credential, Signature};
use gitkit::{GitKit, Readiness, UpdateOutcome};

#[derive(Parser)]
#[command(
    name = "gitkit",
    about = "Keep git working copies in sync and trace content provenance"
)]
struct Cli {
    /// Private key for ssh transport (overrides GITKIT_SSH_KEY)
    #[arg(long, global = true, value_name = "FILE")]
    ssh_key: Option<PathBuf>,

    /// Capture limit for listings and content, e.g. 512k or 20m
    #[arg(long, global = true, value_name = "SIZE")]
    max_output: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the git version in use
    Version,

    /// Check a working copy, resetting it if unusable
    Ready { path: PathBuf, remote: String },

    /// Clone a remote into an empty working copy
    Clone { path: PathBuf, remote: String },

    /// Bring a working copy to a revision
    Update { path: PathBuf, rev: String },

    /// Ready, clone if needed, then update
    Sync {
        path: PathBuf,
        remote: String,
        rev: String,
    },

    /// Earliest commit holding each path's content at a revision
    Origin {
        path: PathBuf,
        #[arg(default_value = "HEAD")]
        rev: String,
        #[arg(long)]
        json: bool,
    },

    /// List the files at a revision
    Tree {
        path: PathBuf,
        rev: String,
        #[arg(long)]
        json: bool,
    },

    /// Files changed by a commit
    Diff { path: PathBuf, rev: String },

    /// Commits reachable from any ref, newest first
    History {
        path: PathBuf,
        /// Only commits touching this file
        #[arg(long = "path", value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Object type of an id
    Type { path: PathBuf, id: String },

    /// Resolve a revision to a commit id
    Hash {
        path: PathBuf,
        rev: String,
        /// Ask the remote instead of the local copy
        #[arg(long)]
        remote: bool,
    },

    /// Write an object's raw content to stdout
    Show { path: PathBuf, id: String },

    /// Best common ancestor of two revisions
    MergeBase { path: PathBuf, a: String, b: String },

    /// Stage everything and commit
    Commit {
        path: PathBuf,
        #[arg(short, long)]
        message: String,
        #[arg(long, requires = "author_email")]
        author_name: Option<String>,
        #[arg(long, requires = "author_name")]
        author_email: Option<String>,
    },

    /// Push the current branch
    Push { path: PathBuf },

    /// Hard-reset the current branch to a revision
    Reset { path: PathBuf, rev: String },
}

impl Commands {
    fn working_copy(&self) -> Option<&Path> {
        match self {
            Commands::Version => None,
            Commands::Ready { path, .. }
            | Commands::Clone { path, .. }
            | Commands::Update { path, .. }
            | Commands::Sync { path, .. }
            | Commands::Origin { path, .. }
            | Commands::Tree { path, .. }
            | Commands::Diff { path, .. }
            | Commands::History { path, .. }
            | Commands::Type { path, .. }
            | Commands::Hash { path, .. }
            | Commands::Show { path, .. }
            | Commands::MergeBase { path, .. }
            | Commands::Commit { path, .. }
            | Commands::Push { path }
            | Commands::Reset { path, .. } => Some(path.as_path()),
        }
    }
}

/// Used when `RUST_LOG` is unset. git diagnostics and recovered update
/// failures are logged at warn.
const DEFAULT_LOG_FILTER: &str = "warn";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn build_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::from_env()?;
    if let Some(key) = &cli.ssh_key {
        config.set_credential(Credential::SshKey(key.clone()));
    }
    if let Some(raw) = &cli.max_output {
        config = config.with_max_output(parse_size("--max-output", raw)?);
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&cli)?;

    // Held until the command finishes.
    let _lock = match cli.command.working_copy() {
        Some(path) => {
            let lock_path = StatePaths::new(config.state_dir()).lock_path(path);
            Some(WorkingCopyLock::acquire(&lock_path, DEFAULT_LOCK_TIMEOUT)?)
        }
        None => None,
    };

    let kit = GitKit::new(config);

    match cli.command {
        Commands::Version => println!("{}", kit.git_version()?),
        Commands::Ready { path, remote } => cmd_ready(&kit, &path, &remote)?,
        Commands::Clone { path, remote } => {
            let repo = kit.repo(path);
            repo.clone(&remote)?;
            println!("Cloned {} into {}", remote, repo.path().display());
        }
        Commands::Update { path, rev } => {
            let outcome = kit.repo(path).update(&rev)?;
            print_outcome(&rev, outcome);
        }
        Commands::Sync { path, remote, rev } => {
            let outcome = kit.repo(path).sync(&remote, &rev)?;
            print_outcome(&rev, outcome);
        }
        Commands::Origin { path, rev, json } => cmd_origin(&kit, path, &rev, json)?,
        Commands::Tree { path, rev, json } => cmd_tree(&kit, path, &rev, json)?,
        Commands::Diff { path, rev } => {
            for entry in kit.repo(path).diff_tree(&rev)? {
                println!("{:<5} {}", entry.status, entry.path);
            }
        }
        Commands::History { path, file } => {
            let repo = kit.repo(path);
            let commits = match file {
                Some(file) => repo.file_history(&file)?,
                None => repo.history()?,
            };
            for commit in commits {
                println!("{}", commit);
            }
        }
        Commands::Type { path, id } => println!("{}", kit.repo(path).object_type(&id)),
        Commands::Hash { path, rev, remote } => {
            let repo = kit.repo(path);
            if remote {
                match repo.remote_hash(&rev)? {
                    Some(id) => println!("{}", id),
                    None => return Err(format!("remote has no ref {}", rev).into()),
                }
            } else {
                println!("{}", repo.local_hash(&rev)?);
            }
        }
        Commands::Show { path, id } => {
            let content = kit.repo(path).blob_content(&id)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
        Commands::MergeBase { path, a, b } => match kit.repo(path).merge_base(&a, &b)? {
            Some(id) => println!("{}", id),
            None => return Err(format!("{} and {} share no history", a, b).into()),
        },
        Commands::Commit {
            path,
            message,
            author_name,
            author_email,
        } => {
            let author = match (author_name, author_email) {
                (Some(name), Some(email)) => Some(Signature { name, email }),
                _ => None,
            };
            kit.repo(path).commit(&message, author.as_ref())?;
            println!("Committed");
        }
        Commands::Push { path } => {
            kit.repo(path).push()?;
            println!("Pushed");
        }
        Commands::Reset { path, rev } => {
            kit.repo(path).reset_hard(&rev)?;
            println!("Reset to {}", rev);
        }
    }

    Ok(())
}

fn cmd_ready(kit: &GitKit, path: &Path, remote: &str) -> Result<(), Box<dyn std::error::Error>> {
    let readiness = kit.repo(path).check_ready(remote)?;
    match readiness {
        Readiness::Ready => println!("ready"),
        Readiness::Reset => println!("reset: {} is empty, clone into it", path.display()),
        Readiness::NeedsClone => println!("empty: clone into {}", path.display()),
    }
    Ok(())
}

fn print_outcome(rev: &str, outcome: UpdateOutcome) {
    match outcome {
        UpdateOutcome::FastPath => println!("Updated to {}", rev),
        UpdateOutcome::Repaired => println!("Updated to {} (branch rebuilt from remote)", rev),
    }
}

fn cmd_origin(
    kit: &GitKit,
    path: PathBuf,
    rev: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let map = kit.repo(path).find_origin(rev)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    if map.is_empty() {
        println!("No files at {}", rev);
        return Ok(());
    }

    println!("{:<12} {:>6} {:<12} PATH", "HASH", "INDEX", "COMMIT");
    println!("{}", "-".repeat(60));
    for (file, entry) in map.iter() {
        let (index, commit) = match entry.origin() {
            Some(origin) => (origin.index.to_string(), origin.commit.short(12).to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<12} {:>6} {:<12} {}",
            entry.hash().short(12),
            index,
            commit,
            file
        );
    }

    Ok(())
}

fn cmd_tree(
    kit: &GitKit,
    path: PathBuf,
    rev: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = kit.repo(path).tree(rev)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in entries {
        println!(
            "{} {:<6} {}\t{}",
            entry.mode,
            entry.kind.as_str(),
            entry.id,
            entry.path
        );
    }

    Ok(())
}
