//! Call-control webhook.
//!
//! The provider POSTs here when a call comes in. The TwiML answer plays a short
//! greeting and then connects the call audio to our media stream endpoint.

use crate::config::AppConfig;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

/// POST /voice
pub async fn voice_webhook(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let conn = req.connection_info();
    let stream_url = stream_url(&config, conn.host());

    info!("Answering incoming call, streaming to {}", stream_url);

    HttpResponse::Ok()
        .content_type("text/xml")
        .body(twiml(&config.telephony.greeting, &stream_url))
}

/// The externally reachable media stream URL.
///
/// Falls back to the webhook's own host when no public URL is configured, which
/// works whenever the same host terminates TLS for both.
pub fn stream_url(config: &AppConfig, host: &str) -> String {
    match &config.telephony.public_ws_url {
        Some(url) if !url.is_empty() => url.clone(),
        _ => format!("wss://{}{}", host, config.telephony.stream_path),
    }
}

pub fn twiml(greeting: &str, stream_url: &str) -> String {
    format!(
        r#"<Response><Say voice="alice">{}</Say><Connect><Stream url="{}"/></Connect></Response>"#,
        xml_escape(greeting),
        xml_escape(stream_url)
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
