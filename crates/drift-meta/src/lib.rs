//! Metadata persistence layer wrapping Fjall.
//!
//! [`MetaStore`] provides typed accessors over two Fjall keyspaces holding the
//! only state a drift node keeps locally:
//!
//! - `uploads`: [`ContentHash`](drift_types::ContentHash) → serialized
//!   [`UploadRecord`](drift_types::UploadRecord) (completed uploads, scanned
//!   daily and republished to the log)
//! - `jobs`: `task/dedup_key` → serialized [`StoredJob`] (pending pipeline
//!   jobs, reloaded on restart so delivery is at-least-once)

mod error;
mod store;

pub use error::MetaError;
pub use store::{MetaStore, StoredJob};
