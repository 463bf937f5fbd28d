//! # Error Handling
//!
//! This module defines every way the audio pipeline can fail.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of failure
//! - **Data**: Upstream failures carry the HTTP status and body they came back with
//! - **Pattern matching**: The retry helper decides what to retry with `match`,
//!   not by probing for a loosely-typed `status` field
//!
//! ### thiserror
//! - `#[error("...")]` generates the `Display` impl; the text becomes the `error`
//!   field of the failure response, so it is written for the caller to read.
//! - `#[source]` keeps the underlying `reqwest::Error` in the chain for the trace.

use std::error::Error as _;
use std::fmt;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::debug::ApiErrorSummary;

/// Which upstream service a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Transcription,
    Chat,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Transcription => write!(f, "Whisper API"),
            Service::Chat => write!(f, "GPT API"),
        }
    }
}

/// All failures of the process-audio flow.
///
/// Every variant is terminal for the request. The only recovery is the retry
/// helper re-running an upstream call whose variant carries HTTP 429.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request method: {0}")]
    InvalidMethod(String),

    /// The body could not be read as multipart form data at all.
    #[error("Invalid form data: {0}")]
    MalformedForm(String),

    #[error("No audio file provided in form data")]
    MissingFile,

    #[error("OpenAI API key not configured")]
    MissingCredential,

    #[error("Whisper API error: {} {}", .0.status, .0.status_text)]
    TranscriptionService(ApiErrorSummary),

    #[error("No transcription text in Whisper response")]
    EmptyTranscription,

    #[error("GPT API error: {} {}", .0.status, .0.status_text)]
    ChatService(ApiErrorSummary),

    #[error("No choices in GPT response")]
    NoChatChoice,

    /// The call never produced a usable HTTP exchange (connect failure,
    /// timeout, or a success body that was not the expected JSON).
    #[error("{service} request failed: {source}")]
    Transport {
        service: Service,
        #[source]
        source: reqwest::Error,
    },
}

impl PipelineError {
    /// Upstream HTTP status, when the failure is an upstream error response.
    pub fn status(&self) -> Option<u16> {
        match self {
            PipelineError::TranscriptionService(summary) | PipelineError::ChatService(summary) => {
                Some(summary.status)
            }
            _ => None,
        }
    }

    /// True for the one transient signal the retry helper reacts to.
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Debug representation followed by the chain of causes, one per line.
    pub fn trace(&self) -> String {
        let mut trace = format!("{:?}", self);
        let mut source = self.source();
        while let Some(cause) = source {
            trace.push_str(&format!("\ncaused by: {}", cause));
            source = cause.source();
        }
        trace
    }
}

/// Every pipeline failure answers 500. The process-audio handler builds its own
/// envelope so the debug trail can ride along; this is the plain fallback.
impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    fn summary(status: u16, status_text: &str) -> ApiErrorSummary {
        ApiErrorSummary {
            status,
            status_text: status_text.to_string(),
            error: "{}".to_string(),
        }
    }

    #[test]
    fn test_only_upstream_429_is_rate_limited() {
        let limited = PipelineError::TranscriptionService(summary(429, "Too Many Requests"));
        assert_eq!(limited.status(), Some(429));
        assert!(limited.is_rate_limited());

        let chat_limited = PipelineError::ChatService(summary(429, "Too Many Requests"));
        assert!(chat_limited.is_rate_limited());

        let server_error = PipelineError::ChatService(summary(500, "Internal Server Error"));
        assert_eq!(server_error.status(), Some(500));
        assert!(!server_error.is_rate_limited());

        assert_eq!(PipelineError::MissingFile.status(), None);
        assert!(!PipelineError::NoChatChoice.is_rate_limited());
    }

    #[test]
    fn test_messages_name_the_failure() {
        assert_eq!(
            PipelineError::InvalidMethod("GET".to_string()).to_string(),
            "Invalid request method: GET"
        );
        assert_eq!(
            PipelineError::TranscriptionService(summary(429, "Too Many Requests")).to_string(),
            "Whisper API error: 429 Too Many Requests"
        );
        assert_eq!(
            PipelineError::ChatService(summary(503, "Service Unavailable")).to_string(),
            "GPT API error: 503 Service Unavailable"
        );
    }

    #[test]
    fn test_trace_includes_variant() {
        let trace = PipelineError::EmptyTranscription.trace();
        assert!(trace.contains("EmptyTranscription"));
    }

    #[actix_web::test]
    async fn test_error_response_is_500_failure_json() {
        let err = PipelineError::TranscriptionService(summary(429, "Too Many Requests"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({"success": false, "error": "Whisper API error: 429 Too Many Requests"})
        );
    }
}
