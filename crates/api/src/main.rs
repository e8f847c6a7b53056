use anyhow::Context;

use clearpath_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    clearpath_observability::init(config.log_format);

    let app = clearpath_api::app::build_app(&config).await?;

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, store = ?config.store, "ClearPath backend listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
