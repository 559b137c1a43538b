//! Response decoding and error classification.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};

/// Decode a successful response body. An empty body decodes to `Null`.
pub(crate) fn decode_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}

/// Classify a non-success response into exactly one error kind.
///
/// The status decides the kind; the body supplies the message and the
/// structured detail payload when it is JSON.
pub(crate) fn classify_error_response(status: u16, body: &str) -> Error {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let raw_message = parsed
        .as_ref()
        .and_then(extract_message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                default_reason(status).to_string()
            } else {
                body.to_string()
            }
        });
    let message = sanitize_error_message(&raw_message);

    let kind = match status {
        400 => ErrorKind::Validation(message),
        401 => ErrorKind::Unauthorized(message),
        403 if message.to_lowercase().contains("suspend") => ErrorKind::TenantSuspended(message),
        403 => ErrorKind::Forbidden(message),
        404 => ErrorKind::NotFound(message),
        500 | 502 | 503 => ErrorKind::Server { status, message },
        504 => ErrorKind::Network(message),
        _ => ErrorKind::Api(message),
    };

    let mut error = Error::new(kind).with_status(status);
    if let Some(details) = parsed {
        error = error.with_details(details);
    }
    error
}

/// Pull a human message out of the common error body shapes:
/// `{"message": ..}`, `{"error": ".."}`, `{"error": {"message": ..}}`,
/// `{"detail": ..}`.
fn extract_message(body: &Value) -> Option<String> {
    let as_text = |v: &Value| v.as_str().map(str::to_string);

    body.get("message")
        .and_then(as_text)
        .or_else(|| {
            body.get("error").and_then(|err| {
                as_text(err).or_else(|| err.get("message").and_then(as_text))
            })
        })
        .or_else(|| body.get("detail").and_then(as_text))
}

fn default_reason(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Authentication required",
        403 => "Access denied",
        404 => "Resource not found",
        500 => "Internal server error",
        502 => "Bad gateway",
        503 => "Service unavailable",
        504 => "Gateway timeout",
        _ => "Request failed",
    }
}

// Hard-coded patterns, compiled once on first use.
static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("static regex")
});
static JWT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").expect("static regex")
});
static TOKEN_ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(access_token|refresh_token)=[^&\s]+").expect("static regex")
});

/// Sanitize an error message to prevent exposing sensitive data.
///
/// This function:
/// - Redacts bearer credentials and JWT-shaped strings
/// - Redacts `access_token` / `refresh_token` assignments
/// - Truncates messages longer than 500 characters
pub fn sanitize_error_message(message: &str) -> String {
    const MAX_LENGTH: usize = 500;

    let mut sanitized = BEARER_RE
        .replace_all(message, "Bearer [REDACTED]")
        .into_owned();
    sanitized = JWT_RE
        .replace_all(&sanitized, "[REDACTED_TOKEN]")
        .into_owned();
    sanitized = TOKEN_ASSIGNMENT_RE
        .replace_all(&sanitized, "$1=[REDACTED]")
        .into_owned();

    if sanitized.len() > MAX_LENGTH {
        let mut cut = MAX_LENGTH;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("...[truncated]");
    }

    sanitized
}
