use anyhow::Context;
use time::OffsetDateTime;
use tracing::info;
use url_shortener::{config, url_service::url_service_capsule};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let deleted = container
        .read(url_service_capsule)
        .sweep(OffsetDateTime::now_utc())
        .await
        .context("Failed to delete expired URLs")?;
    info!(deleted, "Expired URL sweep finished");

    container.read(config::db_conn_capsule).close().await?;
    Ok(())
}
