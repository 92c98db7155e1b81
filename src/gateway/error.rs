//! Gateway-wide error taxonomy and its HTTP rendering.
//!
//! Every policy funnels its failures through [`GatewayError`] so that the wire
//! encoding (status code + JSON error envelope) lives in exactly one place
//! instead of being hand-formatted inside each policy module.

use http::StatusCode;
use serde::Serialize;

use crate::body::TakoBody;
use crate::responder::Responder;
use crate::types::Response;

/// The gateway's error taxonomy, organized by effect rather than by source.
///
/// Variants map directly onto §7 of the design: policy rejection, validation
/// failure, decompression overflow, and the generic internal-failure catch-all.
/// "Remote store unavailable" and "retry exhaustion" are deliberately absent
/// here — both fail open or return the upstream response verbatim, so they
/// never become a `GatewayError`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A policy short-circuited the request with a specific status and message.
    #[error("{message}")]
    Rejected {
        status: StatusCode,
        message: String,
    },

    /// A request or response failed schema/body validation and `log_only` was not set.
    #[error("validation failed: {message}")]
    ValidationFailed { message: String },

    /// The request body could not be decompressed (bad stream, or byte limit exceeded).
    #[error("decompression error: {0}")]
    Decompression(String),

    /// An unexpected internal failure. The original cause is logged but never
    /// rendered to the client.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl GatewayError {
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Rejected { status, .. } => *status,
            GatewayError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Decompression(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Internal(err)
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl Responder for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, GatewayError::Internal(ref err)) {
            tracing::error!(error = %err, "unexpected internal failure");
        }
        let status = self.status();
        let message = self.public_message();
        let envelope = ErrorEnvelope {
            error: ErrorBody { message: &message },
        };
        let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
        hyper::Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(TakoBody::from(body))
            .unwrap_or_else(|_| {
                hyper::Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(TakoBody::empty())
                    .unwrap()
            })
    }
}

/// Writes a GraphQL-shaped error envelope: `{"errors":[{"message":"..."}]}`.
pub fn graphql_error_response(status: StatusCode, message: &str) -> Response {
    #[derive(Serialize)]
    struct GraphQlErrors<'a> {
        errors: [GraphQlError<'a>; 1],
    }
    #[derive(Serialize)]
    struct GraphQlError<'a> {
        message: &'a str,
    }
    let payload = GraphQlErrors {
        errors: [GraphQlError { message }],
    };
    let body = serde_json::to_vec(&payload).unwrap_or_else(|_| b"{}".to_vec());
    hyper::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(TakoBody::from(body))
        .unwrap()
}
