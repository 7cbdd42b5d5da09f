#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

//! `tsundoku` is the library migration engine which powers the manga reader's
//! "migrate to another source" flow.
//!
//! Given entries of the user's library, it searches alternate catalog sources for the
//! same series, picks a match (automatically or by hand) and transfers read progress,
//! categories, tracking links, the custom cover and the favorite flag to the new entry.
//!
//! Everything the engine touches outside of its own state (catalog sources, storage,
//! the cover cache, preferences and logging) is a foreign trait implemented by the app.

/// Error helpers and the `#[tsundoku_error]` attribute.
pub mod error;

/// Catalog entries, chapters and the foreign collaborators that read and write them.
pub mod catalog;

/// Low level primitives shared by the whole crate: logging and the device key-value store.
pub mod primitives;

/// Typed access to the user's migration preferences.
pub mod preferences;

/// The migration engine: flags, match engine, per-entry state, orchestration and state transfer.
pub mod migration;

/// In-memory collaborators for tests and tooling.
#[cfg(any(test, feature = "tooling_tests"))]
pub mod test_utils;

pub use tsundoku_macros::{tsundoku_error, tsundoku_export};

uniffi::setup_scaffolding!("tsundoku");
