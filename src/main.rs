use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use snow::repository::commit_op::CommitOptions;
use snow::{CheckoutOptions, Repository, ResetFlags, SnowError, StatusFilter, WtStatus};

/// Version control for very large binary assets.
///
/// snow tracks worktree snapshots of a project directory and stores file
/// contents in a content-addressed object store. On filesystems with
/// block cloning (APFS, ReFS) adding and restoring multi-gigabyte files
/// is effectively instant.
#[derive(Parser)]
#[command(name = "snow")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'snow <command> --help' for details on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a repository (and its root commit)
    Init {
        /// Worktree directory (default: current directory)
        path: Option<PathBuf>,
        /// Store repository metadata outside the worktree
        commondir: Option<PathBuf>,
    },
    /// Stage files for the next commit
    Add {
        /// Files or directories to stage
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Stage file removals for the next commit
    Rm {
        /// Files to remove
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show the worktree status
    Status,
    /// Record the staged changes as a commit
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Permit a commit with nothing staged
        #[arg(long)]
        allow_empty: bool,
    },
    /// Show the commit history from HEAD
    Log,
    /// Restore the worktree to a commit, branch, or commit-ish
    Checkout {
        /// Create a branch (optionally at START) and switch to it
        #[arg(short = 'b', value_name = "NAME")]
        branch: Option<String>,
        /// Start point for -b
        #[arg(value_name = "START", requires = "branch")]
        start: Option<String>,
        /// Detach HEAD from any branch
        #[arg(short = 'd', long)]
        detach: bool,
        /// Also delete files the target does not track
        #[arg(short = 'n', long = "delete-new")]
        delete_new: bool,
        /// Target commit, branch, or commit-ish (default: HEAD)
        #[arg(value_name = "TARGET", conflicts_with = "branch")]
        target: Option<String>,
    },
}

fn main() -> ExitCode {
    snow::telemetry::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Expected repository failures print a stable fatal line;
            // anything else is a genuine malfunction.
            if let Some(snow_err) = err.downcast_ref::<SnowError>() {
                println!("fatal: {snow_err}");
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { path, commondir } => {
            let workdir = match path {
                Some(p) => p,
                None => std::env::current_dir()?,
            };
            std::fs::create_dir_all(&workdir)?;
            let mut repo = Repository::init(&workdir, commondir.as_deref())?;
            repo.create_commit("Created project", CommitOptions::allow_empty())?;
            println!(
                "Initialized empty snow repository in {}",
                repo.odb().commondir().display()
            );
            Ok(())
        }
        Commands::Add { paths } => {
            let mut repo = open_here()?;
            let workdir = repo.workdir().to_path_buf();
            repo.index_mut().add_files(&workdir, paths)?;
            repo.index().persist(repo.odb())?;
            Ok(())
        }
        Commands::Rm { paths } => {
            let mut repo = open_here()?;
            let workdir = repo.workdir().to_path_buf();
            repo.index_mut().delete_files(&workdir, paths)?;
            repo.index().persist(repo.odb())?;
            Ok(())
        }
        Commands::Status => {
            let repo = open_here()?;
            let report = repo.get_status(StatusFilter::DEFAULT, None)?;
            if report.is_empty() {
                println!("nothing to report, worktree clean");
                return Ok(());
            }
            for entry in report {
                let tag = match entry.status {
                    WtStatus::New => "new",
                    WtStatus::Modified => "modified",
                    WtStatus::Deleted => "deleted",
                    WtStatus::Unmodified => "unmodified",
                    WtStatus::Ignored => "ignored",
                };
                println!("{tag:>10}: {}", entry.rel);
            }
            Ok(())
        }
        Commands::Commit {
            message,
            allow_empty,
        } => {
            let mut repo = open_here()?;
            let opts = CommitOptions {
                allow_empty,
                ..CommitOptions::default()
            };
            let hash = repo.create_commit(&message, opts)?;
            println!("[{}] {message}", &hash.to_hex()[..8]);
            Ok(())
        }
        Commands::Log => {
            let repo = open_here()?;
            let Some(head) = repo.head() else {
                println!("no commits yet");
                return Ok(());
            };
            let mut cursor = Some(head.target);
            while let Some(hash) = cursor {
                let commit = repo.commit_by_hash(&hash)?;
                let marker = if hash == head.target {
                    if head.is_detached() {
                        " (HEAD, detached)"
                    } else {
                        " (HEAD)"
                    }
                } else {
                    ""
                };
                println!("commit {}{marker}", commit.hash);
                println!("Date: {}", commit.date.to_rfc3339());
                println!("\n    {}\n", commit.message);
                cursor = commit.parents.first().copied();
            }
            Ok(())
        }
        Commands::Checkout {
            branch,
            start,
            detach,
            delete_new,
            target,
        } => {
            let mut repo = open_here()?;
            let mut reset = ResetFlags::DEFAULT;
            if delete_new {
                reset = reset | ResetFlags::DELETE_NEW_ITEMS;
            }
            let opts = CheckoutOptions { reset, detach };

            let target = if let Some(name) = branch {
                repo.create_reference(&name, start.as_deref())?;
                name
            } else {
                target.unwrap_or_else(|| "HEAD".to_owned())
            };
            repo.checkout(&target, opts)?;

            let head = repo.head().expect("checkout leaves a HEAD");
            if head.is_detached() {
                println!("HEAD detached at {}", head.target);
            } else {
                println!("Switched to '{}'", head.name);
            }
            Ok(())
        }
    }
}

fn open_here() -> Result<Repository> {
    Ok(Repository::open(&std::env::current_dir()?)?)
}
