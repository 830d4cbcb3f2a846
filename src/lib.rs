//! Declarative reconciliation engine for an ejabberd deployment: a single
//! JSON document describes the desired groups, rooms, and members, and this
//! crate keeps the live server converged on it.

pub mod affiliation;
pub mod bot;
pub mod config_store;
pub mod diagnostic;
pub mod document;
pub mod mutator;
pub mod remote_api;
pub mod sync_engine;
pub mod system;
pub mod validate;
pub mod watcher;
