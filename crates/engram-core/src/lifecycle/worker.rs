//! Background maintenance worker
//!
//! One long-lived cooperative loop per engine instance. Each tick checks
//! which tasks are due (reflection, decay, merge scan, artifact-store GC)
//! and runs them; a task that cannot take the repository lock skips its slot
//! and retries next cycle. Failures are logged, never fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::engine::MemoryEngine;

const TICK: Duration = Duration::from_millis(500);

/// Spawns and owns the maintenance thread
pub struct MaintenanceWorker;

/// Handle controlling a running worker
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceWorker {
    /// Start the loop. Cadences come from the engine config; a zero interval
    /// disables that task.
    pub fn spawn(engine: Arc<MemoryEngine>) -> WorkerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("engram-maintenance".into())
            .spawn(move || run_loop(engine, stop_flag))
            .expect("failed to spawn maintenance thread");

        WorkerHandle {
            stop,
            thread: Some(thread),
        }
    }
}

fn run_loop(engine: Arc<MemoryEngine>, stop: Arc<AtomicBool>) {
    let reflection_every = interval(engine.config().reflection_interval_s);
    let decay_every = interval(engine.config().decay_interval_s);
    let merge_every = interval(engine.config().merge_interval_s);

    let mut last_reflection: Option<Instant> = None;
    let mut last_decay: Option<Instant> = None;
    let mut last_merge: Option<Instant> = None;

    tracing::debug!("Maintenance worker started");
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(TICK);
        if stop.load(Ordering::Relaxed) {
            break;
        }

        if due(&mut last_reflection, reflection_every) {
            run_task("reflection", || engine.reflect().map(|_| ()));
        }
        if due(&mut last_decay, decay_every) {
            run_task("decay", || engine.decay(false).map(|_| ()));
        }
        if due(&mut last_merge, merge_every) {
            run_task("merge scan", || engine.scan_merges().map(|_| ()));
        }
        // The GC gate itself is persistent (>= 24h in config), so checking
        // every tick costs one config read
        run_task("store gc", || engine.maintain_store().map(|_| ()));
    }
    tracing::debug!("Maintenance worker stopped");
}

fn interval(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn due(last: &mut Option<Instant>, every: Option<Duration>) -> bool {
    let Some(every) = every else {
        return false;
    };
    let now = Instant::now();
    match last {
        Some(at) if now.duration_since(*at) < every => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

fn run_task<F>(name: &str, task: F)
where
    F: FnOnce() -> crate::error::Result<()>,
{
    match task() {
        Ok(()) => {}
        Err(e) if e.is_transient() => {
            tracing::debug!("{} skipped, lock unavailable: {}", name, e);
        }
        Err(e) => {
            tracing::warn!("{} failed, will retry next cycle: {}", name, e);
        }
    }
}

impl WorkerHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
