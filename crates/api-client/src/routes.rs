//! Public route classification
//!
//! Membership is substring containment against a fixed allowlist. The
//! allowlist is not path-anchored, so `/v2/health/db` is public too.

use reqwest::Method;

/// Path fragments served without an `Authorization` header.
pub const PUBLIC_ROUTES: &[&str] = &[
    "/geographic",
    "/user-attributes",
    "/user-interests",
    "/user-tags/popular",
    "/user-tags/search",
    "/user-tags/trending",
    "/auth/register",
    "/auth/login",
    "/auth/google",
    "/auth/verify-email",
    "/auth/resend-verification",
    "/auth/forgot-password",
    "/auth/reset-password",
    "/auth/refresh-token",
    "/auth/check-email",
    "/auth/check-method",
    "/auth/status",
    "/health",
    "/system",
    "/events",
];

/// Fragments that are public for reads only. Writing to them needs a session.
const READ_ONLY_PUBLIC_ROUTES: &[&str] = &["/events"];

/// Whether `path` matches the public allowlist. Empty paths are never public.
pub fn is_public(path: &str) -> bool {
    !path.is_empty() && PUBLIC_ROUTES.iter().any(|route| path.contains(route))
}

/// Method-aware variant used when preparing requests.
///
/// Same allowlist as `is_public`, except that fragments in the read-only set
/// only exempt `GET` and `HEAD`, so `POST /events` still carries credentials.
pub fn is_public_request(method: &Method, path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let read = *method == Method::GET || *method == Method::HEAD;
    PUBLIC_ROUTES
        .iter()
        .filter(|route| path.contains(*route))
        .any(|route| read || !READ_ONLY_PUBLIC_ROUTES.contains(route))
}
