//! Core types and traits for the hive job scheduler.
//!
//! A [`Job`] names a registered [`Worker`] and carries an opaque JSON context.
//! Workers answer with a [`WorkerOutput`]: follow-up jobs plus an optional error.

mod error;
mod event;
mod job;
mod worker;

pub use error::*;
pub use event::*;
pub use job::*;
pub use worker::*;
