//! mailcrypt-core
//!
//! Core of an encrypted mail client: PGP key lifecycle management backed by
//! an Enterprise Key Manager (EKM), passphrase strength estimation and
//! generation, and an incremental IMAP-style mailbox sync engine. The crate
//! is transport-agnostic; concrete IMAP and database backends implement the
//! [`backend`] traits.

pub mod backend;
pub mod error;
pub mod security;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CoreError, Result};
