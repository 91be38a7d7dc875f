//! # Health Endpoint
//!
//! Small optional HTTP side channel for supervisors and dashboards. It runs
//! next to the Wyoming listener and never touches the event protocol.
//!
//! ## Routes:
//! - `GET /health`: liveness, model state, worker usage and session counters
//! - `GET /info`: the same capability document a `describe` event returns

use crate::config::HealthConfig;
use crate::handler::ServerContext;
use crate::transcription::registry::ModelDescriptor;
use actix_web::{dev::Server, web, App, HttpResponse, HttpServer};
use serde_json::json;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

pub async fn health_check(ctx: web::Data<ServerContext>) -> HttpResponse {
    let metrics = ctx.state.metrics_snapshot();
    let loaded = ctx.guard.is_loaded();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": ctx.state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uri": ctx.state.config.server.uri,
        },
        "model": {
            "name": ctx.guard.model_name(),
            "status": if loaded { "loaded" } else { "not_loaded" },
            "loaded": loaded,
            "engine_path": ctx.guard.engine_path(),
            "language": ctx.defaults.language,
            "beam_size": ctx.defaults.beam_size,
            "catalog": ModelDescriptor::for_name(ctx.guard.model_name()),
        },
        "workers": {
            "max_jobs": ctx.worker.max_jobs(),
            "available": ctx.worker.available(),
        },
        "metrics": {
            "active_sessions": metrics.active_sessions,
            "total_sessions": metrics.total_sessions,
            "transcriptions": metrics.transcriptions,
            "failed_transcriptions": metrics.failed_transcriptions,
            "audio_bytes": metrics.audio_bytes,
            "average_processing_ms": metrics.average_processing_ms(),
            "protocol_errors": metrics.protocol_errors,
        },
        "memory": memory_info(),
    }))
}

pub async fn info(ctx: web::Data<ServerContext>) -> HttpResponse {
    HttpResponse::Ok().json(&ctx.info)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/info", web::get().to(info));
}

/// Bind the health server. The returned `Server` must be awaited (or spawned) to run.
pub fn build_server(ctx: Arc<ServerContext>, config: &HealthConfig) -> std::io::Result<Server> {
    let data = web::Data::from(ctx);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(TracingLogger::default())
            .configure(configure)
    })
    .workers(1)
    .disable_signals()
    .bind((config.host.as_str(), config.port))?
    .run();

    tracing::info!(host = %config.host, port = config.port, "Health endpoint listening");
    Ok(server)
}

/// Resident and virtual memory of this process, from `/proc` on Linux.
fn memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };
            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}
