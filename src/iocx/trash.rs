//! Recycle-bin dispatch.
//!
//! Deletions route through the host trash whenever the content being removed
//! is not known to the object store — an in-place `checkout HEAD` must never
//! destroy unsaved work. The actual trash invocation is platform-specific
//! and owned by the I/O context (never a process global), so tests and
//! embedders can substitute a callback.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::pool;

/// Command-line budget per trash invocation. Arguments are chunked so a
/// single spawn never exceeds this many bytes of argv.
const ARG_BUDGET: usize = 4096;

/// Maximum trash chunks running concurrently.
const TRASH_CONCURRENCY: usize = 8;

/// Paths at or below this length are refused — a trash request for `/` or
/// `C:\` is always a bug upstream.
#[cfg(unix)]
const MIN_PATH_LEN: usize = 1;
#[cfg(not(unix))]
const MIN_PATH_LEN: usize = 3;

// ---------------------------------------------------------------------------
// TrashBin
// ---------------------------------------------------------------------------

/// How to move paths to the host recycle bin.
pub enum TrashBin {
    /// Spawn a helper program with the paths appended as arguments.
    Command {
        /// Program name or path.
        program: String,
        /// Leading arguments before the paths.
        args: Vec<String>,
    },
    /// Embedder-provided callback (also the test seam).
    Callback(Box<dyn Fn(&[PathBuf]) -> std::io::Result<()> + Send + Sync>),
}

impl fmt::Debug for TrashBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { program, args } => f
                .debug_struct("TrashBin::Command")
                .field("program", program)
                .field("args", args)
                .finish(),
            Self::Callback(_) => f.write_str("TrashBin::Callback(..)"),
        }
    }
}

impl TrashBin {
    /// The host's default trash helper.
    #[must_use]
    pub fn platform_default() -> Self {
        #[cfg(target_os = "macos")]
        {
            Self::Command {
                program: "trash".to_owned(),
                args: vec![],
            }
        }
        #[cfg(target_os = "linux")]
        {
            Self::Command {
                program: "gio".to_owned(),
                args: vec!["trash".to_owned()],
            }
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Self::Command {
                program: "recycle-bin".to_owned(),
                args: vec![],
            }
        }
    }

    /// Move `paths` to the trash.
    ///
    /// Arguments are chunked under [`ARG_BUDGET`] bytes and up to
    /// [`TRASH_CONCURRENCY`] chunks run concurrently. Suspiciously short
    /// paths are refused outright.
    ///
    /// # Errors
    /// The first failing chunk's error, or a refusal for short paths.
    pub fn put(&self, paths: &[PathBuf]) -> std::io::Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        if let Some(short) = paths
            .iter()
            .find(|p| p.as_os_str().len() <= MIN_PATH_LEN)
        {
            return Err(std::io::Error::other(format!(
                "refusing to trash suspicious path {:?}",
                short
            )));
        }

        match self {
            Self::Callback(f) => f(paths),
            Self::Command { program, args } => {
                let chunks = chunk_by_budget(paths, ARG_BUDGET);
                let tasks: Vec<_> = chunks
                    .into_iter()
                    .map(|chunk| {
                        let program = program.clone();
                        let args = args.clone();
                        move || run_trash_command(&program, &args, &chunk)
                    })
                    .collect();
                pool::run_all(TRASH_CONCURRENCY, tasks).map(|_: Vec<()>| ())
            }
        }
    }
}

fn run_trash_command(program: &str, args: &[String], paths: &[PathBuf]) -> std::io::Result<()> {
    let output = Command::new(program)
        .args(args)
        .args(paths)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "`{program}` failed (exit code {:?}): {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Split paths into chunks whose combined argv length stays under `budget`.
/// A single oversized path still gets its own chunk.
fn chunk_by_budget(paths: &[PathBuf], budget: usize) -> Vec<Vec<PathBuf>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut used = 0usize;
    for path in paths {
        let len = path.as_os_str().len() + 1;
        if !current.is_empty() && used + len > budget {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        used += len;
        current.push(path.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn chunking_respects_budget() {
        let paths: Vec<PathBuf> = (0..100)
            .map(|i| PathBuf::from(format!("/work/some/asset-directory/file-{i:03}.psd")))
            .collect();
        let chunks = chunk_by_budget(&paths, 256);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let total: usize = chunk.iter().map(|p| p.as_os_str().len() + 1).sum();
            assert!(total <= 256, "chunk over budget: {total}");
        }
        let flattened: Vec<_> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, paths);
    }

    #[test]
    fn oversized_single_path_gets_own_chunk() {
        let long = PathBuf::from("/x".repeat(300));
        let chunks = chunk_by_budget(&[long.clone()], 256);
        assert_eq!(chunks, vec![vec![long]]);
    }

    #[test]
    fn refuses_short_paths() {
        let bin = TrashBin::Callback(Box::new(|_| Ok(())));
        let err = bin.put(&[PathBuf::from("/")]).unwrap_err();
        assert!(err.to_string().contains("refusing"), "{err}");
    }

    #[test]
    fn callback_receives_all_paths() {
        // Callback seam keeps tests off the real recycle bin.
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let bin = TrashBin::Callback(Box::new(move |p| {
            sink.lock().unwrap().extend_from_slice(p);
            Ok(())
        }));
        let paths = vec![PathBuf::from("/work/a.psd"), PathBuf::from("/work/b.psd")];
        bin.put(&paths).unwrap();
        assert_eq!(*seen.lock().unwrap(), paths);
    }

    #[test]
    fn empty_put_is_noop() {
        let bin = TrashBin::Command {
            program: "definitely-not-installed".to_owned(),
            args: vec![],
        };
        bin.put(&[]).unwrap();
    }
}
