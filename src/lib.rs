pub mod constants;
pub mod error;
pub mod models;
pub mod modules;
pub mod proxy;
#[cfg(test)]
mod test_utils;
pub mod utils;

use modules::system::logger;
use tracing::{error, info};

async fn start_runtime() -> Result<(), String> {
    let mut config = modules::system::config::load_app_config()?;
    models::apply_env_overrides(&mut config);
    models::validate(&config).map_err(|errors| {
        format!("configuration_validation_failed:\n{}", errors.join("\n"))
    })?;

    let state = proxy::server::build_state(config).await?;
    info!("Proxy service starting on port {}", state.config.port);
    proxy::server::serve(state).await
}

pub fn run() {
    logger::init_logger();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        if let Err(e) = start_runtime().await {
            error!("startup_failed: {}", e);
            std::process::exit(1);
        }
        info!("Proxy service stopped");
    });
}
