//! Versioned store: the historized persistence primitive behind every
//! durable artifact (pages, flows, graphs, overlays, configuration,
//! licenses).
//!
//! Each record has an immutable entry per version and a `latest` pointer:
//!
//! ```text
//! {tenant}#{mode}#{env}#{project}[#{surface}][#{app}][#{user}]#{id}#v{version}
//! {tenant}#{mode}#{env}#{project}[#{surface}][#{app}][#{user}]#{id}#latest
//! ```
//!
//! The `latest` pointer always mirrors the highest version entry. A commit
//! writes the version entry first, so a pointer left behind by an interrupted
//! commit is rolled forward on the next read and rewritten on the next write.
//! Deletion writes a tombstone version; nothing is ever physically removed.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
mod record;
mod store;

pub use error::StoreError;
pub use record::VersionedRecord;
pub use store::VersionedStore;
