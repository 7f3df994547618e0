//! Bounded-concurrency task execution.
//!
//! Two pool widths are normative: [`HASH_POOL_SIZE`] for hash computation
//! (CPU-bound) and [`RESTORE_POOL_SIZE`] for file restore/delete work
//! (I/O-bound). A pool drains completely before the caller proceeds, and any
//! task failure cancels the remaining tasks and surfaces the first error.

use rayon::prelude::*;

/// Concurrency for hash-compute tasks.
pub const HASH_POOL_SIZE: usize = 8;

/// Concurrency for file restore/delete tasks.
pub const RESTORE_POOL_SIZE: usize = 32;

/// Run `tasks` on a pool of `width` workers, collecting results in task
/// order.
///
/// Short-circuits on the first `Err`: outstanding tasks are abandoned (rayon
/// stops handing out work once a failure is observed) and the error is
/// returned. Completed side effects are not rolled back.
///
/// # Errors
/// The first task error, or an I/O error if the pool itself cannot be built.
pub fn run_all<T, E, F>(width: usize, tasks: Vec<F>) -> Result<Vec<T>, E>
where
    T: Send,
    E: Send + From<std::io::Error>,
    F: FnOnce() -> Result<T, E> + Send,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(width.max(1))
        .build()
        .map_err(|e| E::from(std::io::Error::other(e)))?;
    pool.install(|| tasks.into_par_iter().map(|task| task()).collect())
}
