//! One-shot change notifications.
//!
//! Reads that opt in register a watch on an exact path. The next mutation
//! touching that path removes the registration and produces exactly one
//! [`WatchedEvent`] for the owning session. Triggered watches are taken out of
//! the registry while the tree's write lock is held, and delivered to session
//! queues after it is released.
mod event;
mod manager;

pub use event::*;
pub use manager::*;

#[cfg(test)]
mod manager_test;
