mod mutation_lock;

pub use mutation_lock::{MutationLock, MutationLockGuard};
