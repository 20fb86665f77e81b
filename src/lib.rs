//! targetsh - administration shell for a storage target subsystem.
//!
//! The crate provides the root command surface: saving, restoring and
//! clearing the whole configuration, inspecting open sessions, and keeping
//! an in-memory tree in step with the live backend.

pub mod backend;
pub mod command;
pub mod config;
pub mod console;
pub mod persist;
pub mod sessions;
pub mod shell;
pub mod snapshot;
pub mod tree;
