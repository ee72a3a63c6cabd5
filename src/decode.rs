use serde::de::DeserializeOwned;

use crate::{wire, ErrorCode, ParseError, Result};

/// Turns a failed response into a [`ParseError`].
///
/// Never fails: bodies that are missing or not shaped like
/// `{"code": <int>, "error": <string>}` degrade to a generic envelope.
pub fn decode_error_envelope(status: u16, body: &[u8]) -> ParseError {
    if body.iter().all(u8::is_ascii_whitespace) {
        return ParseError::new(
            ErrorCode::ConnectionFailed,
            format!("request failed with status {status} and no response body"),
        );
    }

    match serde_json::from_slice::<wire::ErrorBody>(body) {
        Ok(envelope) => ParseError::new(ErrorCode::from(envelope.code), envelope.error),
        Err(_) => ParseError::new(
            ErrorCode::OtherCause,
            format!(
                "request failed with status {status}: {}",
                String::from_utf8_lossy(body)
            ),
        ),
    }
}

/// Decodes a successful JSON response body.
pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|err| {
        ParseError::other(format!(
            "invalid response JSON: {err}; body: {}",
            String::from_utf8_lossy(body)
        ))
    })
}

/// Accepts any successful body, as returned by deletes and logouts.
pub fn decode_empty(_body: &[u8]) -> Result<()> {
    Ok(())
}
