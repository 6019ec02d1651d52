//! Data models for the cookie consent backend.
//!
//! The persisted record keeps the exact field names of the browser-side record so
//! either side can read what the other wrote.

mod category;
mod preferences;
mod snapshot;

pub use category::*;
pub use preferences::*;
pub use snapshot::*;
