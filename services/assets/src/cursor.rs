//! Opaque listing cursor.
//!
//! A cursor is the creation time of the last item on a page, as RFC 3339 with
//! microseconds, wrapped in URL-safe base64 so clients treat it as a token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Cursor is not valid base64")]
    Encoding(#[from] base64::DecodeError),

    #[error("Cursor is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Cursor does not contain a timestamp")]
    Timestamp(#[from] chrono::ParseError),
}

pub fn encode_cursor(created_at: DateTime<Utc>) -> String {
    URL_SAFE_NO_PAD.encode(created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub fn decode_cursor(cursor: &str) -> Result<DateTime<Utc>, CursorError> {
    let raw = String::from_utf8(URL_SAFE_NO_PAD.decode(cursor)?)?;
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_cursor_keeps_microseconds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::microseconds(123_456);
        let cursor = encode_cursor(at);
        assert!(!cursor.contains(':'));
        assert_eq!(decode_cursor(&cursor).unwrap(), at);
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        assert!(matches!(decode_cursor("!!!"), Err(CursorError::Encoding(_))));
        let not_a_time = URL_SAFE_NO_PAD.encode("yesterday");
        assert!(matches!(
            decode_cursor(&not_a_time),
            Err(CursorError::Timestamp(_))
        ));
    }
}
