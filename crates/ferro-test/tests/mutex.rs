use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ferro_kernel::sync::Mutex;
use ferro_kernel::thread::ExecutionState;
use ferro_kernel::{Error, Thread};
use ferro_test::{init_logging, tick, wait_until, HostConfig, HostManager};

const PATIENCE: Duration = Duration::from_secs(5);

#[test]
fn unlock_hands_the_mutex_to_the_waiting_thread() {
    init_logging();
    let manager = HostManager::new(HostConfig::default());
    let mutex = Arc::new(Mutex::new());
    let release = Arc::new(AtomicBool::new(false));
    let (locked_tx, locked_rx) = mpsc::channel();

    let winner = {
        let mutex = mutex.clone();
        let release = release.clone();
        manager
            .spawn(move || {
                mutex.lock();
                locked_tx.send(()).unwrap();
                while !release.load(Ordering::SeqCst) {
                    tick();
                }
                mutex.unlock();
            })
            .unwrap()
    };
    locked_rx.recv_timeout(PATIENCE).unwrap();
    assert_eq!(mutex.owner(), winner.id());

    let (owner_tx, owner_rx) = mpsc::channel();
    let loser = {
        let mutex = mutex.clone();
        manager
            .spawn(move || {
                mutex.lock();
                owner_tx.send(mutex.owner()).unwrap();
                mutex.unlock();
            })
            .unwrap()
    };

    wait_until(PATIENCE, || {
        mutex.waiters() == 1 && loser.execution_state() == ExecutionState::Suspended
    })
    .unwrap();
    assert_eq!(mutex.owner(), winner.id());

    release.store(true, Ordering::SeqCst);
    let owner = owner_rx.recv_timeout(PATIENCE).unwrap();
    assert_eq!(owner, loser.id());

    winner.wait_for_death();
    loser.wait_for_death();
    assert_eq!(mutex.owner(), None);
    assert_eq!(mutex.waiters(), 0);
}

#[test]
fn owner_can_lock_again() {
    init_logging();
    let manager = HostManager::new(HostConfig::default());
    let mutex = Arc::new(Mutex::new());
    let (tx, rx) = mpsc::channel();

    let thread = {
        let mutex = mutex.clone();
        manager
            .spawn(move || {
                mutex.lock();
                mutex.lock();
                assert_eq!(mutex.try_lock(), Ok(()));
                let held = mutex.lock_count();
                mutex.unlock();
                mutex.unlock();
                let still_owned = mutex.owner() == Thread::current().and_then(|t| t.id());
                mutex.unlock();
                tx.send((held, still_owned, mutex.owner())).unwrap();
            })
            .unwrap()
    };

    let (held, still_owned, owner) = rx.recv_timeout(PATIENCE).unwrap();
    assert_eq!(held, 3);
    assert!(still_owned);
    assert_eq!(owner, None);
    thread.wait_for_death();
}

#[test]
fn try_lock_reports_contention() {
    init_logging();
    let manager = HostManager::new(HostConfig::default());
    let mutex = Arc::new(Mutex::new());
    let release = Arc::new(AtomicBool::new(false));
    let (locked_tx, locked_rx) = mpsc::channel();

    let holder = {
        let mutex = mutex.clone();
        let release = release.clone();
        manager
            .spawn(move || {
                mutex.lock();
                locked_tx.send(()).unwrap();
                while !release.load(Ordering::SeqCst) {
                    tick();
                }
                mutex.unlock();
            })
            .unwrap()
    };
    locked_rx.recv_timeout(PATIENCE).unwrap();

    let (tx, rx) = mpsc::channel();
    let contender = {
        let mutex = mutex.clone();
        manager.spawn(move || tx.send(mutex.try_lock()).unwrap()).unwrap()
    };
    assert_eq!(rx.recv_timeout(PATIENCE).unwrap(), Err(Error::TemporaryOutage));

    release.store(true, Ordering::SeqCst);
    holder.wait_for_death();
    contender.wait_for_death();
}

#[test]
fn unlock_by_a_non_owner_halts() {
    init_logging();
    let manager = HostManager::new(HostConfig::default());
    let mutex = Arc::new(Mutex::new());
    let (tx, rx) = mpsc::channel();

    let owner = {
        let mutex = mutex.clone();
        manager.spawn(move || mutex.lock()).unwrap()
    };
    owner.wait_for_death();
    assert_eq!(mutex.owner(), owner.id());

    let intruder = {
        let mutex = mutex.clone();
        manager
            .spawn(move || {
                let halted = std::panic::catch_unwind(AssertUnwindSafe(|| mutex.unlock())).is_err();
                tx.send(halted).unwrap();
            })
            .unwrap()
    };
    assert!(rx.recv_timeout(PATIENCE).unwrap());
    intruder.wait_for_death();
    assert_eq!(mutex.lock_count(), 1);
}

#[test]
fn double_unlock_halts() {
    init_logging();
    let manager = HostManager::new(HostConfig::default());
    let (tx, rx) = mpsc::channel();
    let thread = manager
        .spawn(move || {
            let mutex = Mutex::new();
            mutex.lock();
            mutex.unlock();
            let halted = std::panic::catch_unwind(AssertUnwindSafe(|| mutex.unlock())).is_err();
            tx.send(halted).unwrap();
        })
        .unwrap();
    assert!(rx.recv_timeout(PATIENCE).unwrap());
    thread.wait_for_death();
}

#[test]
fn interruptible_lock_gives_up_when_marked() {
    init_logging();
    let manager = HostManager::new(HostConfig::default());
    let mutex = Arc::new(Mutex::new());

    let holder = {
        let mutex = mutex.clone();
        manager.spawn(move || mutex.lock()).unwrap()
    };
    holder.wait_for_death();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let mutex = mutex.clone();
        manager
            .spawn(move || tx.send(mutex.lock_interruptible()).unwrap())
            .unwrap()
    };
    wait_until(PATIENCE, || mutex.waiters() == 1).unwrap();
    wait_until(PATIENCE, || waiter.execution_state() == ExecutionState::Suspended).unwrap();

    waiter.mark_interrupted();
    waiter.resume().unwrap();
    assert_eq!(rx.recv_timeout(PATIENCE).unwrap(), Err(Error::Signaled));
    assert_eq!(mutex.waiters(), 0);
    waiter.wait_for_death();
}

#[test]
fn interrupted_waiter_hands_the_mutex_to_the_next_one() {
    init_logging();
    let manager = HostManager::new(HostConfig::default());
    let mutex = Arc::new(Mutex::new());
    let release = Arc::new(AtomicBool::new(false));
    let (locked_tx, locked_rx) = mpsc::channel();

    let holder = {
        let mutex = mutex.clone();
        let release = release.clone();
        manager
            .spawn(move || {
                mutex.lock();
                locked_tx.send(()).unwrap();
                while !release.load(Ordering::SeqCst) {
                    tick();
                }
                mutex.unlock();
            })
            .unwrap()
    };
    locked_rx.recv_timeout(PATIENCE).unwrap();

    let (quitter_tx, quitter_rx) = mpsc::channel();
    let quitter = {
        let mutex = mutex.clone();
        manager
            .spawn(move || quitter_tx.send(mutex.lock_interruptible()).unwrap())
            .unwrap()
    };
    wait_until(PATIENCE, || {
        mutex.waiters() == 1 && quitter.execution_state() == ExecutionState::Suspended
    })
    .unwrap();

    let (owner_tx, owner_rx) = mpsc::channel();
    let patient = {
        let mutex = mutex.clone();
        manager
            .spawn(move || {
                mutex.lock();
                owner_tx.send(mutex.owner()).unwrap();
                mutex.unlock();
            })
            .unwrap()
    };
    wait_until(PATIENCE, || {
        mutex.waiters() == 2 && patient.execution_state() == ExecutionState::Suspended
    })
    .unwrap();

    quitter.mark_interrupted();
    release.store(true, Ordering::SeqCst);
    assert_eq!(quitter_rx.recv_timeout(PATIENCE).unwrap(), Err(Error::Signaled));
    assert_eq!(owner_rx.recv_timeout(PATIENCE).unwrap(), patient.id());

    holder.wait_for_death();
    quitter.wait_for_death();
    patient.wait_for_death();
    assert_eq!(mutex.owner(), None);
    assert_eq!(mutex.waiters(), 0);
}
