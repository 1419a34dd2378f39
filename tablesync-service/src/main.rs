use crate::config::load_service_config;
use crate::core::start_service_with_config;
use tablesync_config::shared::ServiceConfig;
use tablesync_telemetry::init_tracing;
use tracing::error;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let service_config = load_service_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(service_config))?;

    Ok(())
}

async fn async_main(service_config: ServiceConfig) -> anyhow::Result<()> {
    if let Err(err) = start_service_with_config(service_config).await {
        error!("an error occurred in the table sync service: {err:#}");

        return Err(err);
    }

    Ok(())
}
