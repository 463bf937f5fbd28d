use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness probe. Also reports whether the OpenAI credential is present, since a
/// missing key only shows up as per-request failures otherwise.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "status": if state.credential_configured() { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "credential_configured": state.credential_configured(),
        "upstream": {
            "base_url": config.openai.base_url,
            "transcription_model": config.openai.transcription_model,
            "chat_model": config.openai.chat_model
        },
        "retry": {
            "max_attempts": state.retry.max_attempts,
            "initial_delay_ms": state.retry.initial_delay.as_millis() as u64,
            "multiplier": state.retry.multiplier
        }
    }))
}
