use crate::config::AppConfig;
use crate::state::{AppState, CallMetrics};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "calls": {
            "active": metrics.active_calls,
            "total": metrics.total_calls,
            "rejected": metrics.rejected_calls
        },
        "realtime": {
            "model": config.realtime.model,
            "credentials_configured": config.realtime.api_key.is_some()
        },
        "tts": {
            "enabled": config.tts.enabled
        },
        "system": load_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "calls": {
            "active": metrics.active_calls,
            "total": metrics.total_calls,
            "rejected": metrics.rejected_calls,
            "calls_per_minute": if uptime_seconds > 0 {
                metrics.total_calls as f64 * 60.0 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "audio": {
            "frames_sent": metrics.frames_sent,
            "frames_dropped": metrics.frames_dropped,
            "drop_rate": drop_rate(&metrics)
        },
        "turns": {
            "responses_requested": metrics.responses_requested,
            "tts_failures": metrics.tts_failures
        },
        "performance": {
            "max_concurrent_calls": config.performance.max_concurrent_calls,
            "debounce_ms": config.turn.debounce_ms
        },
        "system": load_status(&config, &metrics)
    }))
}

fn drop_rate(metrics: &CallMetrics) -> f64 {
    let total = metrics.frames_sent + metrics.frames_dropped;
    if total > 0 {
        metrics.frames_dropped as f64 / total as f64
    } else {
        0.0
    }
}

fn load_status(config: &AppConfig, metrics: &CallMetrics) -> serde_json::Value {
    let usage = if config.performance.max_concurrent_calls > 0 {
        metrics.active_calls as f64 / config.performance.max_concurrent_calls as f64
    } else {
        0.0
    };

    let status = if usage >= 1.0 {
        "at_capacity"
    } else if usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "call_usage_percent": (usage * 100.0).round(),
        "max_calls": config.performance.max_concurrent_calls,
        "current_calls": metrics.active_calls
    })
}
