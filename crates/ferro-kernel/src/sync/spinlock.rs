use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::{cpu, interrupts};

/// Busy-wait lock over a single flag.
///
/// Nothing stops an interrupt handler on the same CPU from spinning on a lock
/// the interrupted code holds; use [`IntSafeSpinLock`] where that can happen.
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        let mut spins = 0;
        while self.locked.swap(true, Ordering::Acquire) {
            cpu::relax(&mut spins);
        }
    }

    pub fn try_lock(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    pub fn unlock(&self) {
        if !self.locked.swap(false, Ordering::Release) {
            crate::fatal!("spinlock unlocked while not locked");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// Spinlock that keeps local interrupts disabled while held.
#[derive(Debug)]
pub struct IntSafeSpinLock {
    base: SpinLock,
    drains_work: bool,
}

impl IntSafeSpinLock {
    pub const fn new() -> Self {
        Self {
            base: SpinLock::new(),
            drains_work: true,
        }
    }

    /// The cross-CPU work queue's own lock, which must not drain that queue.
    pub(crate) const fn exempt() -> Self {
        Self {
            base: SpinLock::new(),
            drains_work: false,
        }
    }

    pub fn lock(&self) {
        interrupts::disable();
        self.lock_unsafe();
    }

    /// Acquires without touching the interrupt state.
    pub fn lock_unsafe(&self) {
        let mut spins = 0;
        while !self.base.try_lock() {
            if self.drains_work && !cpu::CROSS_CPU_WORK.is_empty() {
                cpu::CROSS_CPU_WORK.drain();
            }
            cpu::relax(&mut spins);
        }
    }

    pub fn try_lock(&self) -> bool {
        interrupts::disable();
        if self.try_lock_unsafe() {
            true
        } else {
            interrupts::enable();
            false
        }
    }

    pub fn try_lock_unsafe(&self) -> bool {
        self.base.try_lock()
    }

    pub fn unlock(&self) {
        self.unlock_unsafe();
        interrupts::enable();
    }

    pub fn unlock_unsafe(&self) {
        self.base.unlock();
    }

    pub fn is_locked(&self) -> bool {
        self.base.is_locked()
    }
}

impl Default for IntSafeSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Data protected by an [`IntSafeSpinLock`].
pub struct IntSafeSpin<T> {
    lock: IntSafeSpinLock,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only reachable through a guard, which holds `lock`.
unsafe impl<T: Send> Send for IntSafeSpin<T> {}
unsafe impl<T: Send> Sync for IntSafeSpin<T> {}

impl<T> IntSafeSpin<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: IntSafeSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> IntSafeSpinGuard<'_, T> {
        self.lock.lock();
        IntSafeSpinGuard::new(self)
    }
}

impl<T: Default> Default for IntSafeSpin<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Holds an [`IntSafeSpin`] locked. Tied to the CPU that took the lock.
pub struct IntSafeSpinGuard<'a, T> {
    spin: &'a IntSafeSpin<T>,
    _cpu: PhantomData<*const ()>,
}

impl<'a, T> IntSafeSpinGuard<'a, T> {
    fn new(spin: &'a IntSafeSpin<T>) -> Self {
        Self {
            spin,
            _cpu: PhantomData,
        }
    }
}

impl<T> Deref for IntSafeSpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.spin.data.get() }
    }
}

impl<T> DerefMut for IntSafeSpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.spin.data.get() }
    }
}

impl<T> Drop for IntSafeSpinGuard<'_, T> {
    fn drop(&mut self) {
        self.spin.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CROSS_CPU_WORK;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new();
        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    #[should_panic(expected = "not locked")]
    fn double_unlock_is_fatal() {
        let lock = SpinLock::new();
        lock.lock();
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn int_safe_lock_disables_interrupts_while_held() {
        let lock = IntSafeSpinLock::new();
        lock.lock();
        assert!(!interrupts::are_enabled());
        assert!(!lock.try_lock());
        assert!(!interrupts::are_enabled());
        lock.unlock();
        assert!(interrupts::are_enabled());

        assert!(lock.try_lock_unsafe());
        assert!(interrupts::are_enabled());
        lock.unlock_unsafe();
    }

    #[test]
    fn guard_keeps_interrupts_disabled_until_dropped() {
        let spin = IntSafeSpin::new(Vec::new());
        let mut guard = spin.lock();
        guard.push(1);
        assert!(!interrupts::are_enabled());
        drop(guard);
        assert!(interrupts::are_enabled());
        assert_eq!(*spin.lock(), vec![1]);
    }

    #[test]
    fn guards_serialize_increments() {
        let counter = Arc::new(IntSafeSpin::new(0u64));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
    }

    #[test]
    fn spinning_drains_cross_cpu_work() {
        crate::init_test_logging();
        let lock = Arc::new(IntSafeSpinLock::new());
        let ran = Arc::new(AtomicUsize::new(0));
        lock.lock();

        {
            let ran = ran.clone();
            CROSS_CPU_WORK.post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        let spinner = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.lock();
                lock.unlock();
            })
        };

        // Only a CPU spinning on the lock is around to run the work.
        while ran.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        lock.unlock();
        spinner.join().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Lock,
        TryLock,
        Unlock,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Lock), Just(Op::TryLock), Just(Op::Unlock)]
    }

    proptest! {
        #[test]
        fn single_owner_sequences_match_model(ops in prop::collection::vec(op(), 0..64)) {
            let lock = SpinLock::new();
            let mut held = false;
            for op in ops {
                match op {
                    Op::Lock if !held => {
                        lock.lock();
                        held = true;
                    }
                    Op::TryLock => {
                        prop_assert_eq!(lock.try_lock(), !held);
                        held = true;
                    }
                    Op::Unlock if held => {
                        lock.unlock();
                        held = false;
                    }
                    _ => {}
                }
                prop_assert_eq!(lock.is_locked(), held);
            }
        }
    }
}
