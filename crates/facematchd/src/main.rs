use anyhow::{Context, Result};
use facematch_core::{Pipeline, TemplateStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facematchd starting");

    let config = config::Config::load()?;
    tracing::debug!(?config, "configuration resolved");

    let store = TemplateStore::open(&config.template_dir)
        .with_context(|| format!("opening template dir {}", config.template_dir.display()))?;

    // Models load once here and are shared by every request.
    let engine = facematch_core::spawn_engine(
        &config.detector_model_path(),
        &config.recognizer_model_path(),
        config.multi_face_policy,
        config.engine_queue_depth,
    )
    .context("starting embedding engine")?;

    let pipeline = Arc::new(Pipeline::new(
        engine,
        store,
        config.embedding_dim,
        config.timeouts(),
    ));
    let app = http::router(pipeline, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        templates = %config.template_dir.display(),
        "facematchd ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("facematchd shutting down");
    Ok(())
}
