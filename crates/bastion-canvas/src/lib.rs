//! Canvas command log.
//!
//! Every accepted command lands at exactly one revision. The head pointer
//! names the newest revision; an append is accepted only when the caller's
//! `base_rev` equals it. Idempotency keys are recorded so a retried request
//! can be recognized with [`CanvasCommandStore::check_idempotency`]; the
//! store itself never deduplicates.
//!
//! Key layout under the `{tenant}#{mode}#{env}` prefix:
//!
//! ```text
//! …#head#{canvas_id}
//! …#command#{canvas_id}#rev#{revision:010}
//! …#idem#{canvas_id}#{idempotency_key}
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
mod model;
mod store;

pub use error::CanvasError;
pub use model::{AppendCommand, CanvasCommand, CanvasHead, IdempotencyRecord};
pub use store::{CanvasCommandStore, CANVAS_RESOURCE_KIND};
