//! Translation of HTTP failures into [`RemoteError`].

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::remote::{RemoteError, RemoteErrorKind};

/// Header carrying the storage service error code.
const STORAGE_ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Errors raised while building an Azure client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AzureClientError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Http(String),
    /// An endpoint is not a valid URL.
    #[error("invalid {name} endpoint {value:?}: {message}")]
    Endpoint {
        /// Which endpoint was rejected.
        name: &'static str,
        /// Rejected value.
        value: String,
        /// Parser message.
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ArmErrorBody {
    #[serde(default)]
    error: ArmErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ArmErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Maps a transport failure. Without a status the error text is all there
/// is to classify.
pub(crate) fn transport(context: &str, err: &reqwest::Error) -> RemoteError {
    let message = format!("{context}: {err}");
    if err.status() == Some(StatusCode::TOO_MANY_REQUESTS) {
        RemoteError::new(RemoteErrorKind::Throttled, message)
    } else {
        RemoteError::from_message(message)
    }
}

/// Maps a non-success management-plane response, reading the ARM error
/// envelope from the body.
pub(crate) async fn from_arm_response(context: &str, response: Response) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ArmErrorBody>(&body)
        .map(|parsed| parsed.error)
        .unwrap_or_default();
    let message = if detail.message.is_empty() {
        body
    } else {
        detail.message
    };
    classified(context, status, &detail.code, &message)
}

/// Maps a non-success data-plane response. Storage reports its error code in
/// a header; the XML body is kept verbatim in the message.
pub(crate) async fn from_storage_response(context: &str, response: Response) -> RemoteError {
    let status = response.status();
    let code = response
        .headers()
        .get(STORAGE_ERROR_CODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let body = response.text().await.unwrap_or_default();
    classified(context, status, &code, &body)
}

/// Uses the status and error code first; responses that carry neither a
/// code nor a telling status fall back to the signatures in the body.
fn classified(context: &str, status: StatusCode, code: &str, message: &str) -> RemoteError {
    let text = format!("{context}: StatusCode={} {code} {message}", status.as_u16())
        .trim_end()
        .to_owned();
    match RemoteErrorKind::from_status(status.as_u16(), code) {
        RemoteErrorKind::Other => RemoteError::from_message(text),
        kind => RemoteError::new(kind, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StatusCode::CONFLICT, "ContainerBeingDeleted", RemoteErrorKind::ContainerBeingDeleted)]
    #[case(StatusCode::NOT_FOUND, "ContainerNotFound", RemoteErrorKind::NotFound)]
    #[case(StatusCode::TOO_MANY_REQUESTS, "", RemoteErrorKind::Throttled)]
    #[case(StatusCode::FORBIDDEN, "AuthorizationFailed", RemoteErrorKind::Unauthorized)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", RemoteErrorKind::Other)]
    fn responses_are_classified(
        #[case] status: StatusCode,
        #[case] code: &str,
        #[case] kind: RemoteErrorKind,
    ) {
        let err = classified("create container", status, code, "details");
        assert_eq!(err.kind, kind);
        assert!(err.message.starts_with("create container: StatusCode="));
    }

    #[rstest]
    #[case(
        StatusCode::CONFLICT,
        "The specified container is being deleted. Try operation later.",
        RemoteErrorKind::ContainerBeingDeleted
    )]
    #[case(
        StatusCode::BAD_REQUEST,
        "StorageAccountIsNotProvisioned: account is still being created",
        RemoteErrorKind::AccountNotProvisioned
    )]
    #[case(
        StatusCode::SERVICE_UNAVAILABLE,
        "client throttled, retry later",
        RemoteErrorKind::Throttled
    )]
    #[case(StatusCode::CONFLICT, "<Error>conflict</Error>", RemoteErrorKind::Other)]
    fn bodies_without_error_code_are_classified_by_text(
        #[case] status: StatusCode,
        #[case] body: &str,
        #[case] kind: RemoteErrorKind,
    ) {
        let err = classified("create container", status, "", body);
        assert_eq!(err.kind, kind, "{err}");
        assert!(err.message.ends_with(body), "{err}");
    }

    #[test]
    fn arm_envelope_is_parsed() {
        let body = r#"{"error":{"code":"StorageAccountIsNotProvisioned","message":"not yet"}}"#;
        let parsed: ArmErrorBody = serde_json::from_str(body).unwrap_or_default();
        assert_eq!(parsed.error.code, "StorageAccountIsNotProvisioned");
        assert_eq!(parsed.error.message, "not yet");
    }
}
