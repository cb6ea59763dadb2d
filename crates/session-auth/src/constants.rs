//! Storage keys and auth-service endpoint paths

/// Short-lived bearer credential sent on every non-public request.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Long-lived credential exchanged for a new access token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Serialized user profile written at login. Not interpreted here.
pub const USER_KEY: &str = "user";

/// Every key cleared when the session ends.
pub const SESSION_KEYS: &[&str] = &[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Renewal endpoint, relative to the API base URL.
pub const REFRESH_TOKEN_PATH: &str = "/auth/refresh-token";

/// Email/password login endpoint, relative to the API base URL.
pub const LOGIN_PATH: &str = "/auth/login";
