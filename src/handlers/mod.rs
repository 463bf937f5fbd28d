pub mod process_audio;

pub use process_audio::*;

use actix_web::web;

use crate::health;

/// Routes shared by the server and the handler tests.
///
/// The audio endpoint accepts every method so that a wrong one is answered with the
/// usual JSON failure envelope instead of a bare 404/405.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/process-audio", web::route().to(process_audio))
            .service(
                web::scope("/v1")
                    .route("/process-audio", web::route().to(process_audio))
                    .route("/health", web::get().to(health::health_check)),
            ),
    )
    .route("/health", web::get().to(health::health_check));
}
