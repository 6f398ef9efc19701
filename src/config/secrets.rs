//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for credentials in favq.

pub use secrecy::{ExposeSecret, SecretString};
