//! Core types and trait definitions for the Annal audit trail.
//!
//! An audit trail is an append-only sequence of [`record::AuditRecord`]s per
//! tracked entity. This crate owns the record model, change capture
//! ([`writer`]), history replay ([`revision`]) and compaction
//! ([`retention`]). Storage backends implement [`store::AuditStore`];
//! [`memory::MemoryStore`] is the in-process one.

// Traits use native `async fn`; the `Send` bounds live on the declared
// return types, so the advisory lint is noise here.
#![allow(async_fn_in_trait)]

pub mod auditable;
pub mod change_set;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod record;
pub mod retention;
pub mod revision;
pub mod sequencer;
pub mod store;
pub mod switch;
pub mod writer;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
