//! HTTP response building helpers

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;

use crate::error::{LedgerError, StorageError};

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

fn error_body(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::NOT_FOUND, message)
}

/// Empty response with the given status (HEAD, preflight)
pub fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Status for a ledger rejection. The message is passed through verbatim.
pub fn ledger_status(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidReference
        | LedgerError::TooManyTags(_)
        | LedgerError::EmptyTag(_)
        | LedgerError::TagTooLong(_)
        | LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
    }
}

/// Convert a StorageError to an appropriate HTTP response
pub fn error_response(error: StorageError) -> Response<Full<Bytes>> {
    let status = match &error {
        StorageError::Ledger(e) => ledger_status(e),
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::InvalidInput(_) | StorageError::Json(_) => StatusCode::BAD_REQUEST,
        StorageError::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    error_body(status, &error.to_string())
}

/// Build a binary response with the given content type
pub fn binary_response(content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_map_to_client_errors() {
        let cases = [
            (LedgerError::InvalidReference, StatusCode::BAD_REQUEST),
            (LedgerError::TooManyTags(11), StatusCode::BAD_REQUEST),
            (LedgerError::EmptyTag(0), StatusCode::BAD_REQUEST),
            (LedgerError::TagTooLong("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::InvalidArgument("count".into()), StatusCode::BAD_REQUEST),
            (LedgerError::NotFound(9), StatusCode::NOT_FOUND),
        ];
        for (error, status) in cases {
            assert_eq!(error_response(StorageError::Ledger(error)).status(), status);
        }
    }

    #[test]
    fn test_storage_errors() {
        assert_eq!(
            error_response(StorageError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(StorageError::Upstream("down".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_response(StorageError::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
