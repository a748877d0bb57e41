//! Key-value backend contract for every stateful Bastion component.
//!
//! Backends are addressed by `(table, key)`. Keys follow the `#`-delimited,
//! scope-prefixed layout built by the stores; backends treat them as opaque
//! strings ordered bytewise.
//!
//! Every backend provides an atomic [`KvBackend::put_if_absent`]. Stores
//! combine it with the in-process [`KeyedLocks`] table to get exactly-once
//! version and revision writes: the lock serializes writers inside one
//! process, the conditional create rejects the loser across processes.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod backend;
mod error;
pub mod filesystem;
mod locks;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod timeout;

pub use backend::{decode, encode, open_backend, BackendType, KvBackend};
pub use error::{KvError, KvResult};
pub use filesystem::FilesystemKv;
pub use locks::KeyedLocks;
pub use memory::MemoryKv;
pub use timeout::TimeoutBackend;
