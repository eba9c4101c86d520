use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use server::{cleanup, config::Config, handlers, state::AppState};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use worker::YtDlpResolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("server=debug,worker=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    for dir in [&config.download_dir, &config.platform_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("no se pudo crear {}", dir.display()))?;
    }

    let resolver = Arc::new(YtDlpResolver::new(&config.ytdlp_bin));
    let state = AppState::new(&config, resolver);

    // router HTTP
    let app = handlers::build_router(state.clone());

    // limpieza de archivos viejos en segundo plano
    tokio::spawn(cleanup::run(
        state.clone(),
        config.cleanup_interval,
        config.file_retention,
    ));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", config.bind_addr))?;
    info!("server escuchando en {}", listener.local_addr()?);
    info!(
        "descargas en {} / plataforma en {}",
        config.download_dir.display(),
        config.platform_dir.display()
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
