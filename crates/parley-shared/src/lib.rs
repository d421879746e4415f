//! Shared building blocks for the Parley group-chat session protocol:
//! wire types, cryptographic primitives, and the error taxonomy.
//!
//! Everything in this crate is transport-agnostic; the session state
//! machine in `parley-session` drives it.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;
