//! # Debug Trail
//!
//! A request-scoped record of what the pipeline did: the steps it took, the instants it
//! reached each milestone, what it learned about the upload, and what the upstream
//! services answered. The trail is created when a request arrives, handed to every stage
//! as `&mut DebugTrail`, serialized verbatim into the response (success or failure) and
//! then dropped. Nothing here outlives the request.
//!
//! Field names serialize in camelCase (`whisperStart`, `apiResponses`, ...) so clients
//! see one stable JSON shape.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PipelineError;
use crate::openai::ChatRequest;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTrail {
    pub steps: Vec<String>,
    pub errors: Vec<ErrorRecord>,
    pub timestamps: Timestamps,
    pub request_info: RequestInfo,
    pub api_responses: ApiResponses,
    /// Only filled in once the whole pipeline has succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub trace: String,
    pub timestamp: DateTime<Utc>,
}

/// Milestones of a request. Unreached milestones are omitted from the JSON.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Start,
    WhisperStart,
    WhisperEnd,
    GptStart,
    GptEnd,
    End,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: usize,
    pub name: String,
}

/// What an upstream service sent back when it answered with a non-success status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorSummary {
    pub status: u16,
    pub status_text: String,
    /// Raw response body, unparsed.
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionSummary {
    pub transcription_length: usize,
    pub transcription_text: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponses {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper_error: Option<ApiErrorSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper_success: Option<TranscriptionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_request: Option<ChatRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_error: Option<ApiErrorSummary>,
}

/// Millisecond durations derived from the recorded timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub whisper_duration: i64,
    pub gpt_duration: i64,
    pub total_duration: i64,
}

impl DebugTrail {
    /// Open a trail for a request, stamping `start` and the method.
    pub fn begin(method: &str) -> Self {
        let mut trail = DebugTrail::default();
        trail.mark(Mark::Start);
        trail.request_info.method = method.to_string();
        trail
    }

    pub fn step(&mut self, description: impl Into<String>) {
        let description = description.into();
        tracing::debug!(step = %description, "pipeline step");
        self.steps.push(description);
    }

    /// Record the current instant for a milestone and return it.
    pub fn mark(&mut self, mark: Mark) -> DateTime<Utc> {
        let now = Utc::now();
        let slot = match mark {
            Mark::Start => &mut self.timestamps.start,
            Mark::WhisperStart => &mut self.timestamps.whisper_start,
            Mark::WhisperEnd => &mut self.timestamps.whisper_end,
            Mark::GptStart => &mut self.timestamps.gpt_start,
            Mark::GptEnd => &mut self.timestamps.gpt_end,
            Mark::End => &mut self.timestamps.end,
        };
        *slot = Some(now);
        now
    }

    pub fn record_file(&mut self, info: FileInfo) {
        self.request_info.file_info = Some(info);
    }

    /// Keep the upstream error body of a failed attempt. A later failure of the same
    /// service overwrites an earlier one; other failure kinds are ignored here.
    pub fn record_api_error(&mut self, error: &PipelineError) {
        match error {
            PipelineError::TranscriptionService(summary) => {
                self.api_responses.whisper_error = Some(summary.clone());
            }
            PipelineError::ChatService(summary) => {
                self.api_responses.gpt_error = Some(summary.clone());
            }
            _ => {}
        }
    }

    /// Append the terminal failure of the request.
    pub fn record_failure(&mut self, error: &PipelineError) {
        self.errors.push(ErrorRecord {
            message: error.to_string(),
            trace: error.trace(),
            timestamp: Utc::now(),
        });
    }

    /// Stamp `end` and derive the three durations. Returns `None` if any of the
    /// intervening milestones was never reached.
    pub fn finish_timings(&mut self) -> Option<Timings> {
        self.mark(Mark::End);
        let timings = self.timestamps.timings()?;
        self.timings = Some(timings);
        Some(timings)
    }
}

impl Timestamps {
    pub fn timings(&self) -> Option<Timings> {
        let millis = |from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>| {
            Some((to? - from?).num_milliseconds())
        };

        Some(Timings {
            whisper_duration: millis(self.whisper_start, self.whisper_end)?,
            gpt_duration: millis(self.gpt_start, self.gpt_end)?,
            total_duration: millis(self.start, self.end)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_begin_stamps_start_and_method() {
        let trail = DebugTrail::begin("POST");
        assert!(trail.timestamps.start.is_some());
        assert!(trail.timestamps.end.is_none());
        assert_eq!(trail.request_info.method, "POST");
        assert!(trail.steps.is_empty());
        assert!(trail.errors.is_empty());
    }

    #[test]
    fn test_serializes_camel_case_and_omits_unreached_fields() {
        let mut trail = DebugTrail::begin("POST");
        trail.mark(Mark::WhisperStart);
        trail.record_file(FileInfo {
            content_type: "audio/wav".to_string(),
            size: 4,
            name: "question.wav".to_string(),
        });

        let json = serde_json::to_value(&trail).unwrap();
        assert!(json["timestamps"]["start"].is_string());
        assert!(json["timestamps"]["whisperStart"].is_string());
        assert!(json["timestamps"].get("gptStart").is_none());
        assert_eq!(json["requestInfo"]["fileInfo"]["type"], "audio/wav");
        assert_eq!(json["requestInfo"]["fileInfo"]["size"], 4);
        assert!(json.get("timings").is_none());
        assert_eq!(json["apiResponses"], serde_json::json!({}));
    }

    #[test]
    fn test_api_errors_are_filed_by_service() {
        let mut trail = DebugTrail::default();
        let summary = ApiErrorSummary {
            status: 429,
            status_text: "Too Many Requests".to_string(),
            error: "slow down".to_string(),
        };

        trail.record_api_error(&PipelineError::TranscriptionService(summary.clone()));
        assert_eq!(trail.api_responses.whisper_error.as_ref(), Some(&summary));
        assert!(trail.api_responses.gpt_error.is_none());

        trail.record_api_error(&PipelineError::ChatService(summary.clone()));
        assert_eq!(trail.api_responses.gpt_error.as_ref(), Some(&summary));

        trail.record_api_error(&PipelineError::NoChatChoice);
        assert!(trail.api_responses.whisper_error.is_some());
        assert!(trail.api_responses.gpt_error.is_some());
        assert!(trail.errors.is_empty());
    }

    #[test]
    fn test_record_failure_keeps_message_and_trace() {
        let mut trail = DebugTrail::default();
        trail.record_failure(&PipelineError::MissingFile);

        assert_eq!(trail.errors.len(), 1);
        assert_eq!(trail.errors[0].message, "No audio file provided in form data");
        assert!(trail.errors[0].trace.contains("MissingFile"));
    }

    #[test]
    fn test_timings_are_millisecond_differences() {
        let t0 = Utc::now();
        let stamps = Timestamps {
            start: Some(t0),
            whisper_start: Some(t0 + Duration::milliseconds(5)),
            whisper_end: Some(t0 + Duration::milliseconds(305)),
            gpt_start: Some(t0 + Duration::milliseconds(310)),
            gpt_end: Some(t0 + Duration::milliseconds(710)),
            end: Some(t0 + Duration::milliseconds(712)),
        };

        let timings = stamps.timings().unwrap();
        assert_eq!(timings.whisper_duration, 300);
        assert_eq!(timings.gpt_duration, 400);
        assert_eq!(timings.total_duration, 712);
    }

    #[test]
    fn test_timings_need_every_milestone() {
        let mut trail = DebugTrail::begin("POST");
        trail.mark(Mark::WhisperStart);
        trail.mark(Mark::WhisperEnd);
        assert!(trail.finish_timings().is_none());
        assert!(trail.timings.is_none());
        assert!(trail.timestamps.end.is_some());
    }
}
