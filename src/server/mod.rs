//! Router assembly: mirrors the teacher's `server/mod.rs` middleware-layering pattern — routes
//! built first, then `Extension`/`from_fn_with_state` layers wrapped around the whole router so
//! every request passes cookie validation before reaching a handler.

pub mod endpoints;
pub mod middleware;
pub mod state;

use axum::routing::get;
use axum::Router;

use self::endpoints::{health, timetable};
use self::middleware::cookie_validator::require_cookie_header;
use self::state::AppState;

pub fn build_router(state: AppState) -> Router {
    // `weeks/all` and `weeks/current_forward` are static siblings of the `weeks/:offset` param
    // route at the same segment; `matchit` (axum's router) resolves this by giving a static
    // segment priority over a named parameter at the same position rather than treating it as a
    // conflict, so this does not panic at construction — it's the same pattern as a REST API
    // registering `/users/me` alongside `/users/:id`. `weeks/forward/:count` has an extra segment
    // and never overlaps the single-segment `weeks/:offset` route.
    let timetable_routes = Router::new()
        .route("/profiles/:username/weeks/all", get(timetable::all_weeks))
        .route(
            "/profiles/:username/weeks/current_forward",
            get(timetable::current_forward),
        )
        .route(
            "/profiles/:username/weeks/forward/:count",
            get(timetable::forward_count),
        )
        .route("/profiles/:username/weeks/:offset", get(timetable::single_week))
        .route_layer(axum::middleware::from_fn(require_cookie_header));

    Router::new()
        .route("/health", get(health::health))
        .merge(timetable_routes)
        .with_state(state)
}

/// Waits for either `ctrl_c` or (on unix) `SIGTERM`, for use as axum's graceful shutdown future.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl_c, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
