//! Session credentials for the API client
//!
//! Owns everything that touches the user's tokens directly: the persisted
//! credential jar, the storage key names, and the calls to the remote
//! authentication service. This crate has no policy of its own. Deciding
//! when to renew, whom to notify and what to replay lives in `api-client`.
//!
//! Credential flow:
//! 1. `api-client` posts to `LOGIN_PATH` and writes the tokens under
//!    `ACCESS_TOKEN_KEY` / `REFRESH_TOKEN_KEY` via `CredentialStore::write()`
//! 2. Every non-public request reads `ACCESS_TOKEN_KEY`
//! 3. On a 401 the refresh coordinator calls `token::refresh_token()` once
//! 4. Success rewrites the tokens, failure calls `CredentialStore::clear_all()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use token::{LoginResponse, RefreshResponse, is_expired, refresh_token, token_expires_at};
