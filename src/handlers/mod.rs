pub mod voice;

pub use voice::*;

use crate::{health, websocket};
use actix_web::{web, HttpResponse};

/// Route table shared by the server and the handler tests.
///
/// The media stream path is configurable, so the table is built from it.
pub fn configure(stream_path: String) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics)),
        )
        .route("/", web::get().to(liveness))
        .route("/health", web::get().to(health::health_check))
        .route("/voice", web::post().to(voice_webhook))
        .route(&stream_path, web::get().to(websocket::twilio_stream));
    }
}

/// GET /
pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain")
        .body("Call voice bridge OK")
}
