use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Result of one worker thread.
#[derive(Debug, Clone)]
pub struct WorkerReport<T> {
    /// Worker index.
    pub worker: usize,
    /// Value returned by the worker.
    pub value: T,
    /// Wall time spent inside the worker body.
    pub elapsed: Duration,
}

/// Runs `body` on `workers` scoped threads released together by a barrier.
///
/// Reports come back in worker order. A panicking worker propagates its
/// panic to the caller.
pub fn run_concurrently<T, F>(workers: usize, body: F) -> Vec<WorkerReport<T>>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let barrier = Barrier::new(workers);
    let reports = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let barrier = &barrier;
                let body = &body;
                scope.spawn(move || {
                    barrier.wait();
                    let start = Instant::now();
                    let value = body(worker);
                    WorkerReport {
                        worker,
                        value,
                        elapsed: start.elapsed(),
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(report) => report,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect::<Vec<_>>()
    });
    debug!(workers, "workload finished");
    reports
}
