//! Core identity types for the atgraph pipeline
//!
//! Identities pair a stable account key (a DID) with the human-readable
//! handle currently bound to it. The directory feed creates records, the
//! handle verifier moves them between verification states, and checkpoints
//! make both jobs resumable.

pub mod checkpoint;
pub mod identity;

pub use checkpoint::*;
pub use identity::*;
