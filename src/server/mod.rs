//! Loopback HTTP server — the local JSON API for the GUI helper and the
//! installer.
//!
//! Binds the configured host (default `127.0.0.1`) on the main port
//! (default 3456). Status codes: 200 for everything that parsed, including
//! logical failures carried in `success:false`; 4xx only for malformed
//! JSON; 5xx only for unexpected internal errors.

pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::Agent;

/// Assemble the full route table.
pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/status", get(routes::status::status))
        .route("/fingerprint", get(routes::status::fingerprint))
        .route(
            "/settings",
            get(routes::settings::get_settings).post(routes::settings::post_settings),
        )
        .route("/control-server/status", get(routes::control::status))
        .route("/control-server/connect", post(routes::control::connect))
        .route(
            "/control-server/disconnect",
            post(routes::control::disconnect),
        )
        .route(
            "/control-server/reconnect",
            post(routes::control::reconnect),
        )
        .route("/tool", post(routes::tool::tool))
        .route("/fs/list", post(routes::fs::list))
        .route("/fs/read", post(routes::fs::read))
        .route("/fs/read_range", post(routes::fs::read_range))
        .route("/fs/write", post(routes::fs::write))
        .route("/fs/delete", post(routes::fs::delete_path))
        .route("/fs/move", post(routes::fs::move_path))
        .route("/fs/search", post(routes::fs::search))
        .route("/fs/grep", post(routes::fs::grep))
        .route("/fs/patch", post(routes::fs::patch))
        .route("/shell/exec", post(routes::shell::exec))
        .route("/shell/session/list", get(routes::shell::list_sessions))
        .route("/shell/session/start", post(routes::shell::start_session))
        .route("/shell/session/input", post(routes::shell::send_input))
        .route("/shell/session/read", post(routes::shell::read_output))
        .route("/shell/session/stop", post(routes::shell::stop_session))
        .route("/system/info", get(routes::system::info))
        .route("/clipboard/read", get(routes::system::clipboard_read))
        .route("/clipboard/write", post(routes::system::clipboard_write))
        .route("/wait", post(routes::system::wait))
        .route("/unlock", post(routes::unlock::unlock))
        .route(
            "/unlock/credentials",
            post(routes::unlock::store_credentials).delete(routes::unlock::clear_credentials),
        )
        .route("/unlock/status", get(routes::unlock::status))
        .route(
            "/credential-provider/unlock",
            get(routes::unlock::provider_unlock),
        )
        .route(
            "/credential-provider/credentials",
            get(routes::unlock::provider_credentials),
        )
        .route(
            "/credential-provider/result",
            post(routes::unlock::provider_result),
        )
        .route(
            "/credential-provider/status",
            get(routes::unlock::provider_status),
        )
        .route("/screen/stream/start", post(routes::screen::stream_start))
        .route("/screen/stream/stop", post(routes::screen::stream_stop))
        .route(
            "/screen/stream/refresh",
            post(routes::screen::stream_refresh),
        )
        .route("/screen/stream/stats", get(routes::screen::stream_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    agent: Arc<Agent>,
    listener: TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(agent);
    info!("Local API ready on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
