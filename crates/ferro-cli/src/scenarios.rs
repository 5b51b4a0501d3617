//! Contention scenarios run on host-backed kernel threads.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use ferro_kernel::sync::{Mutex, RwLock, Semaphore};
use ferro_kernel::Thread;
use ferro_test::{tick, wait_until, HostConfig, HostManager};
use log::{debug, info};

pub struct ScenarioConfig {
    pub threads: usize,
    pub iterations: usize,
    /// How long to wait for a thread to reach a requested state.
    pub patience: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 1000,
            patience: Duration::from_secs(10),
        }
    }
}

fn spawn_all<F>(manager: &Arc<HostManager>, count: usize, mut body: F) -> Result<Vec<Thread>>
where
    F: FnMut(usize) -> Box<dyn FnOnce() + Send>,
{
    let mut threads = Vec::with_capacity(count);
    for index in 0..count {
        let thread = manager
            .spawn(body(index))
            .with_context(|| format!("failed to spawn thread {index}"))?;
        threads.push(thread);
    }
    Ok(threads)
}

fn join_all(threads: &[Thread]) {
    for thread in threads {
        thread.wait_for_death();
    }
}

pub struct MutexReport {
    pub counter: u64,
    pub expected: u64,
}

pub fn mutex(config: &ScenarioConfig) -> Result<MutexReport> {
    let manager = HostManager::new(HostConfig::default());
    let lock = Arc::new(Mutex::new());
    let counter = Arc::new(AtomicU64::new(0));
    let iterations = config.iterations;

    let threads = spawn_all(&manager, config.threads, |_| {
        let lock = lock.clone();
        let counter = counter.clone();
        Box::new(move || {
            for _ in 0..iterations {
                lock.lock();
                // Split read and write so a lapse in exclusion loses updates.
                let value = counter.load(Ordering::Relaxed);
                tick();
                counter.store(value + 1, Ordering::Relaxed);
                lock.unlock();
            }
        })
    })?;
    join_all(&threads);

    let report = MutexReport {
        counter: counter.load(Ordering::Relaxed),
        expected: (config.threads * config.iterations) as u64,
    };
    ensure!(
        report.counter == report.expected,
        "mutex lost updates: {} of {}",
        report.counter,
        report.expected
    );
    info!("mutex scenario finished with {} threads", manager.started());
    Ok(report)
}

pub struct SemaphoreReport {
    pub max_inside: usize,
}

pub fn semaphore(config: &ScenarioConfig, permits: u64) -> Result<SemaphoreReport> {
    ensure!(permits > 0, "a semaphore without permits never lets anyone in");
    let manager = HostManager::new(HostConfig::default());
    let semaphore = Arc::new(Semaphore::new(permits));
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let iterations = config.iterations;

    let threads = spawn_all(&manager, config.threads, |_| {
        let semaphore = semaphore.clone();
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        Box::new(move || {
            for _ in 0..iterations {
                semaphore.down();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tick();
                inside.fetch_sub(1, Ordering::SeqCst);
                semaphore.up();
            }
        })
    })?;
    join_all(&threads);

    let report = SemaphoreReport {
        max_inside: max_inside.load(Ordering::SeqCst),
    };
    ensure!(
        report.max_inside as u64 <= permits,
        "{} threads inside a semaphore with {permits} permits",
        report.max_inside
    );
    ensure!(
        semaphore.count() == permits,
        "semaphore ended at {} instead of {permits}",
        semaphore.count()
    );
    Ok(report)
}

pub struct RwLockReport {
    pub reads: usize,
    pub writes: usize,
    pub max_readers: usize,
}

pub fn rwlock(config: &ScenarioConfig, writers: usize) -> Result<RwLockReport> {
    ensure!(
        writers <= config.threads,
        "{writers} writers requested but only {} threads",
        config.threads
    );
    let manager = HostManager::new(HostConfig::default());
    let lock = Arc::new(RwLock::new());
    let active_readers = Arc::new(AtomicUsize::new(0));
    let max_readers = Arc::new(AtomicUsize::new(0));
    let writing = Arc::new(AtomicBool::new(false));
    let overlap = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let writes = Arc::new(AtomicUsize::new(0));
    let iterations = config.iterations;

    let threads = spawn_all(&manager, config.threads, |index| {
        let lock = lock.clone();
        let active_readers = active_readers.clone();
        let max_readers = max_readers.clone();
        let writing = writing.clone();
        let overlap = overlap.clone();
        let reads = reads.clone();
        let writes = writes.clone();
        let body: Box<dyn FnOnce() + Send> = if index < writers {
            Box::new(move || {
                for _ in 0..iterations {
                    lock.lock_write();
                    writing.store(true, Ordering::SeqCst);
                    if active_readers.load(Ordering::SeqCst) > 0 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    tick();
                    writing.store(false, Ordering::SeqCst);
                    lock.unlock();
                    writes.fetch_add(1, Ordering::Relaxed);
                }
            })
        } else {
            Box::new(move || {
                for _ in 0..iterations {
                    lock.lock_read();
                    let now = active_readers.fetch_add(1, Ordering::SeqCst) + 1;
                    max_readers.fetch_max(now, Ordering::SeqCst);
                    if writing.load(Ordering::SeqCst) {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    tick();
                    active_readers.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock();
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            })
        };
        body
    })?;
    join_all(&threads);

    ensure!(
        !overlap.load(Ordering::SeqCst),
        "a writer overlapped with another holder"
    );
    ensure!(
        lock.readers() == 0 && !lock.is_write_locked(),
        "rw lock still held after every thread finished"
    );
    Ok(RwLockReport {
        reads: reads.load(Ordering::Relaxed),
        writes: writes.load(Ordering::Relaxed),
        max_readers: max_readers.load(Ordering::SeqCst),
    })
}

pub struct LifecycleReport {
    pub suspensions: usize,
    pub blocks: usize,
    pub killed: usize,
}

pub fn lifecycle(config: &ScenarioConfig) -> Result<LifecycleReport> {
    let manager = HostManager::new(HostConfig::default());
    let laps = Arc::new(AtomicU64::new(0));
    let threads = spawn_all(&manager, config.threads, |_| {
        let laps = laps.clone();
        Box::new(move || loop {
            laps.fetch_add(1, Ordering::Relaxed);
            tick();
        })
    })?;

    let mut report = LifecycleReport {
        suspensions: 0,
        blocks: 0,
        killed: 0,
    };
    for round in 0..config.iterations {
        for thread in &threads {
            thread.suspend(true)?;
            thread.resume()?;
            report.suspensions += 1;

            thread.block(true)?;
            thread.unblock()?;
            report.blocks += 1;
        }
        debug!("lifecycle round {round} done");
    }

    let before = laps.load(Ordering::Relaxed);
    wait_until(config.patience, || laps.load(Ordering::Relaxed) > before)
        .context("threads stopped running after being resumed")?;

    for thread in &threads {
        thread.kill()?;
        report.killed += 1;
    }
    join_all(&threads);
    Ok(report)
}
