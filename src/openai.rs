//! # OpenAI Client
//!
//! The two outbound calls of the pipeline:
//! - `POST {base_url}/audio/transcriptions`: multipart upload of the audio plus the model id
//! - `POST {base_url}/chat/completions`: JSON chat request with the Magic 8 Ball persona
//!
//! Both authenticate with a bearer token. A non-success status is turned into the matching
//! `PipelineError` variant carrying status, reason phrase and raw body, so the retry helper
//! can spot a 429 and the debug trail can show exactly what the service said.
//!
//! Each method performs exactly one HTTP exchange; retrying is the caller's business.

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::debug::ApiErrorSummary;
use crate::error::{PipelineError, Service};

/// System prompt sent with every chat request.
pub const PERSONA_PROMPT: &str = "You are the Magic 8 Ball. Provide mystical, fortune-telling responses to questions, similar to the classic toy. Keep responses concise, under 5 words. If the user didn't ask a question, still give vague advice";

/// The uploaded audio as received from the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, or `None` when there is no choice or the first
    /// one carries no `message.content`.
    pub fn first_reply(&self) -> Option<String> {
        self.choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.clone())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    transcription_model: String,
    chat_model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            transcription_model: config.transcription_model.clone(),
            chat_model: config.chat_model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Build the chat payload for a transcript: persona first, then the transcript as the
    /// user turn.
    pub fn chat_request(&self, transcript: &str) -> ChatRequest {
        ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: PERSONA_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: transcript.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
        }
    }

    pub async fn transcribe(
        &self,
        api_key: &str,
        audio: &AudioUpload,
    ) -> Result<TranscriptionResponse, PipelineError> {
        let transport = |source: reqwest::Error| PipelineError::Transport {
            service: Service::Transcription,
            source,
        };

        let file_part = multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.content_type)
            .map_err(transport)?;

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("model", self.transcription_model.clone());

        debug!(
            model = %self.transcription_model,
            bytes = audio.bytes.len(),
            "Sending audio to transcription service"
        );

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(PipelineError::TranscriptionService(
                error_summary(response).await,
            ));
        }

        response.json().await.map_err(transport)
    }

    pub async fn complete(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<ChatCompletionResponse, PipelineError> {
        let transport = |source: reqwest::Error| PipelineError::Transport {
            service: Service::Chat,
            source,
        };

        debug!(model = %request.model, "Sending transcript to chat service");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(PipelineError::ChatService(error_summary(response).await));
        }

        response.json().await.map_err(transport)
    }
}

async fn error_summary(response: reqwest::Response) -> ApiErrorSummary {
    let status = response.status();
    let error = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {}>", e));

    ApiErrorSummary {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        error,
    }
}
