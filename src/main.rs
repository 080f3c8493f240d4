mod config;
mod error;
mod limiter;
mod model;
mod orchestrator;
mod scrape;
mod server;
mod session;
mod teachers;
mod transport;
mod util;

use anyhow::Context;

use crate::config::Config;
use crate::server::state::AppState;
use crate::teachers::TeacherCache;
use crate::transport::Transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .context("usage: timatalva-adapter <config.json>")?;
    let config = Config::load(&config_path).context("failed to load config")?;

    let transport = Transport::new(
        config.upstream_base_url.clone(),
        config.request_timeout_sec,
        config.max_retries,
        config.backoff_factor_sec,
    )
    .context("failed to build transport")?;
    let teacher_cache = TeacherCache::new(config.teacher_cache_ttl_sec);

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(transport, teacher_cache, config);
    let router = server::build_router(state);

    tracing::info!(%bind_addr, "{}", util::get_pretty_time());
    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr: {bind_addr}"))?;

    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}
