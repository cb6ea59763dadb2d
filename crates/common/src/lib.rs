//! Shared types for the API client workspace
//!
//! `Secret` keeps passwords and tokens out of Debug output and logs;
//! `Error` covers configuration loading for binaries built on the client.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
