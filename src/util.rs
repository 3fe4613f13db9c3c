//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Pull a `jwt.<token>` entry out of a `Sec-WebSocket-Protocol` header value.
///
/// Browsers cannot set `Authorization` on a WebSocket, so the token rides
/// along as a subprotocol.
pub fn jwt_from_protocols(raw: &str) -> Option<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter_map(|part| part.strip_prefix("jwt."))
        .find(|rest| !rest.is_empty())
        .map(|rest| rest.to_string())
}
