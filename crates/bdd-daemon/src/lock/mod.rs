mod registry;

pub use registry::{KeyLock, LockRegistry};
