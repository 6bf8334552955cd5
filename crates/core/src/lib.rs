//! fireball-core
//!
//! Core library of the fireball decompiler.
//!
//! Starting from one or more entry addresses, the engine disassembles
//! reachable code, lifts each instruction to a small IR, and renders the IR
//! as C-like pseudocode. An address-space index records which ranges have
//! already been analyzed so that later requests, possibly running
//! concurrently, reuse that work instead of redoing it.
//!
//! Modules:
//! - `model`: output contract (`KnownSection`, `Assembly`, `Ir`,
//!   `DecompileResult`) and the payloads carried in their `data` fields.
//! - `backends`: loader/decoder/lifting-rule traits and their built-in
//!   implementations.
//! - `analysis`: the pipeline itself.
//! - `db`: project layout, config, and SQLite persistence.

pub mod analysis;
pub mod backends;
pub mod db;
pub mod error;
pub mod model;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
