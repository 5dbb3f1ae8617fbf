//! Worker threads for CPU-bound decoding.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::oneshot;

/// A unit of work submitted to a [`WorkerPool`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs off the I/O event loop.
///
/// A pool may drop a job without running it (for example while shutting
/// down); the loader reports that as a failed decode.
pub trait WorkerPool: Send + Sync + 'static {
    fn submit(&self, job: Job);
}

/// A bounded [`rayon`] thread pool.
pub struct RayonPool {
    pool: rayon::ThreadPool,
}

impl RayonPool {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("ribs-decode-{index}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl fmt::Debug for RayonPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonPool")
            .field("threads", &self.threads())
            .finish()
    }
}

impl WorkerPool for RayonPool {
    fn submit(&self, job: Job) {
        self.pool.spawn(job);
    }
}

/// Why a submitted job produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobFailure {
    /// The pool dropped the job.
    Dropped,
    Panicked(String),
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Dropped => f.write_str("worker pool dropped the job"),
            JobFailure::Panicked(msg) => write!(f, "worker panicked: {msg}"),
        }
    }
}

/// Run `work` on `pool` and wait for its value on the calling task.
///
/// Panics are caught on the worker so they never reach rayon's handler,
/// which would abort the process.
pub(crate) async fn run_on<T, W>(pool: &dyn WorkerPool, work: W) -> Result<T, JobFailure>
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    pool.submit(Box::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(work))
            .map_err(|payload| JobFailure::Panicked(panic_message(payload.as_ref())));
        // receiver gone means the request was abandoned
        let _ = tx.send(outcome);
    }));

    match rx.await {
        Ok(outcome) => outcome,
        Err(_) => Err(JobFailure::Dropped),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DroppingPool;

    impl WorkerPool for DroppingPool {
        fn submit(&self, job: Job) {
            drop(job);
        }
    }

    #[tokio::test]
    async fn test_rayon_runs_off_the_caller_thread() {
        let pool = RayonPool::new(2).unwrap();
        assert_eq!(pool.threads(), 2);

        let name = run_on(&pool, || {
            std::thread::current().name().map(str::to_string)
        })
        .await
        .unwrap();
        assert!(name.unwrap().starts_with("ribs-decode-"));
    }

    #[tokio::test]
    async fn test_dropped_job() {
        let result = run_on(&DroppingPool, || 1).await;
        assert_eq!(result, Err(JobFailure::Dropped));
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let pool = RayonPool::new(1).unwrap();
        let result: Result<(), _> = run_on(&pool, || panic!("bad pixels")).await;
        assert_eq!(result, Err(JobFailure::Panicked("bad pixels".to_string())));

        // the pool survives
        assert_eq!(run_on(&pool, || 7).await, Ok(7));
    }
}
