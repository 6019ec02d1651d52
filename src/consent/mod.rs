//! Cookie consent subsystem.
//!
//! `ConsentStore` owns the persisted record, `ConsentDispatcher` reconciles
//! third-party scripts and cookies after each save, and `ConsentContext` exposes
//! both to the presentation surfaces. `ConsentSessions` keeps one context per
//! visitor.

mod adapters;
mod context;
mod dispatcher;
mod ports;
mod sessions;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use adapters::*;
pub use context::*;
pub use dispatcher::*;
pub use ports::*;
pub use sessions::*;
pub use store::*;
