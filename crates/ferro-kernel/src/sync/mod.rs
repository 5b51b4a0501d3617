mod mutex;
mod rwlock;
mod semaphore;
mod spinlock;
mod wait;
mod waitq;

pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::{IntSafeSpin, IntSafeSpinGuard, IntSafeSpinLock, SpinLock};
pub use waitq::{WaitQueue, WaitQueueGuard, Waiter, WaiterId};

pub(crate) use wait::block_on;
