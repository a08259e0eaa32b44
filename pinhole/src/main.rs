mod cli;
mod config;
mod hooks;

use config::RunConfig;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    tracing::info!("pinhole v{}", env!("CARGO_PKG_VERSION"));

    // fatal: traversal cannot work under user-mode container networking
    pinhole_core::precheck::check_host_network()?;

    let config = RunConfig::load()?;
    let mut session = config.session()?;
    let mut handler = hooks::Hooks::new(config.exec.clone());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        session
            .run_until(&mut handler, async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down, releasing any router mapping");
            })
            .await
    })?;
    Ok(())
}
