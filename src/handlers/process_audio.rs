//! # Process Audio Handler
//!
//! `POST /api/process-audio` takes a multipart upload with a `file` field, has it
//! transcribed, asks the chat service for a Magic 8 Ball answer to the transcript and
//! returns both.
//!
//! ## Flow:
//! 1. Check the method (any method is routed here, so a GET still gets a JSON answer)
//! 2. Pull the `file` field out of the multipart body
//! 3. Check that an API key is configured
//! 4. Transcription call, retried on 429
//! 5. Chat call, retried on 429
//! 6. Compute timings and answer
//!
//! ## Response:
//! ```json
//! {
//!   "success": true,
//!   "transcription": "Will I get the job?",
//!   "response": "Signs point to yes",
//!   "debug": { "steps": [...], "errors": [], "timestamps": {...}, "timings": {...}, ... }
//! }
//! ```
//! Any failure returns status 500 with `{"success": false, "error": "...", "debug": {...}}`,
//! where `debug` holds everything gathered up to the failure.

use actix_multipart::Multipart;
use actix_web::{http::Method, web, HttpRequest, HttpResponse, ResponseError};
use futures_util::stream::StreamExt;
use serde::Serialize;
use tracing::{error, info};

use crate::debug::{DebugTrail, FileInfo, Mark, TranscriptionSummary};
use crate::error::PipelineError;
use crate::openai::AudioUpload;
use crate::retry::retry_with_backoff;
use crate::state::AppState;

/// Name of the multipart field carrying the audio.
pub const AUDIO_FIELD: &str = "file";

const DEFAULT_FILE_NAME: &str = "audio.wav";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Final payload of a request, borrowed from the handler's locals for serialization.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutcomeEnvelope<'a> {
    Success {
        success: bool,
        transcription: &'a str,
        response: &'a str,
        debug: &'a DebugTrail,
    },
    Failure {
        success: bool,
        error: String,
        debug: &'a DebugTrail,
    },
}

/// What a successful run produces besides the trail.
#[derive(Debug, Clone, PartialEq)]
pub struct Oracle {
    pub transcription: String,
    pub response: String,
}

pub async fn process_audio(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> HttpResponse {
    let mut trail = DebugTrail::begin(req.method().as_str());

    match run_pipeline(&req, payload, &state, &mut trail).await {
        Ok(oracle) => {
            info!(
                transcription_chars = oracle.transcription.chars().count(),
                total_ms = trail.timings.map(|t| t.total_duration),
                "Audio processed"
            );
            HttpResponse::Ok().json(OutcomeEnvelope::Success {
                success: true,
                transcription: &oracle.transcription,
                response: &oracle.response,
                debug: &trail,
            })
        }
        Err(err) => {
            error!(error = %err, "Audio processing failed");
            trail.record_failure(&err);
            HttpResponse::build(err.status_code()).json(OutcomeEnvelope::Failure {
                success: false,
                error: err.to_string(),
                debug: &trail,
            })
        }
    }
}

async fn run_pipeline(
    req: &HttpRequest,
    payload: web::Payload,
    state: &AppState,
    trail: &mut DebugTrail,
) -> Result<Oracle, PipelineError> {
    if req.method() != Method::POST {
        return Err(PipelineError::InvalidMethod(req.method().to_string()));
    }

    trail.step("Extracting form data");
    let audio = extract_audio(req, payload).await?;
    trail.record_file(FileInfo {
        content_type: audio.content_type.clone(),
        size: audio.bytes.len(),
        name: audio.file_name.clone(),
    });
    trail.step(format!(
        "Audio file extracted successfully: {} bytes",
        audio.bytes.len()
    ));

    let api_key = state
        .config
        .openai
        .credential()
        .ok_or(PipelineError::MissingCredential)?;

    let transcription = transcribe(state, api_key, &audio, trail).await?;
    let response = consult(state, api_key, &transcription, trail).await?;

    trail.finish_timings();

    Ok(Oracle {
        transcription,
        response,
    })
}

/// Read the multipart body and return the first non-empty `file` field.
async fn extract_audio(
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<AudioUpload, PipelineError> {
    let mut form = Multipart::new(req.headers(), payload);
    let mut upload: Option<AudioUpload> = None;

    while let Some(item) = form.next().await {
        let mut field = item.map_err(|e| PipelineError::MalformedForm(e.to_string()))?;

        let content_disposition = field.content_disposition().ok_or_else(|| {
            PipelineError::MalformedForm("Missing content disposition".to_string())
        })?;

        let is_audio = content_disposition.get_name() == Some(AUDIO_FIELD);
        let file_name = content_disposition
            .get_filename()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();
        let content_type = field
            .content_type()
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| PipelineError::MalformedForm(e.to_string()))?;
            if is_audio && upload.is_none() {
                bytes.extend_from_slice(&chunk);
            }
        }

        if is_audio && upload.is_none() && !bytes.is_empty() {
            upload = Some(AudioUpload {
                bytes,
                file_name,
                content_type,
            });
        }
    }

    upload.ok_or(PipelineError::MissingFile)
}

async fn transcribe(
    state: &AppState,
    api_key: &str,
    audio: &AudioUpload,
    trail: &mut DebugTrail,
) -> Result<String, PipelineError> {
    trail.step("Sending to Whisper API");
    trail.mark(Mark::WhisperStart);

    let client = &state.openai;
    let result = retry_with_backoff(&state.retry, trail, move || {
        client.transcribe(api_key, audio)
    })
    .await?;

    trail.mark(Mark::WhisperEnd);
    trail.api_responses.whisper_success = Some(TranscriptionSummary {
        transcription_length: result.text.as_deref().map_or(0, |text| text.chars().count()),
        transcription_text: result.text.clone(),
    });
    trail.step("Whisper transcription successful");

    match result.text {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(PipelineError::EmptyTranscription),
    }
}

async fn consult(
    state: &AppState,
    api_key: &str,
    transcription: &str,
    trail: &mut DebugTrail,
) -> Result<String, PipelineError> {
    trail.step("Sending to ChatGPT API");
    trail.mark(Mark::GptStart);

    let client = &state.openai;
    let request = client.chat_request(transcription);
    trail.api_responses.gpt_request = Some(request.clone());

    let request = &request;
    let completion = retry_with_backoff(&state.retry, trail, move || {
        client.complete(api_key, request)
    })
    .await?;

    trail.mark(Mark::GptEnd);
    trail.step("ChatGPT response received");

    completion.first_reply().ok_or(PipelineError::NoChatChoice)
}
