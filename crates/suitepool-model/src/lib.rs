//! Shared data model for the suitepool test orchestrator.
//!
//! Everything that crosses a process boundary lives here: suite identifiers,
//! worker identities, port blocks, the worker launch contract and the
//! message protocol spoken between a slot and its workers.

mod error;
pub use error::ModelError;

mod domain;
pub use domain::*;

mod protocol;
pub use protocol::*;
