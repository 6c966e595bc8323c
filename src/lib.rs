pub mod annotation;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod reconcile;
pub mod temporal;

pub use config::Config;
pub use database::Database;
pub use error::{status_message, AppError};

use tracing_subscriber::EnvFilter;

/// Install the log subscriber. `RUST_LOG` wins over `level` when set.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
    {
        log::debug!("Logging already initialized: {}", e);
    }
}

/// Load the configuration, start logging and open (or create) the store it
/// names.
pub fn start(config_path: Option<&std::path::Path>) -> Result<(Config, Database), AppError> {
    let config = Config::load(config_path)?;
    init_logging(&config.log_level);
    log::info!("bat-survey v{}", env!("CARGO_PKG_VERSION"));

    let db = commands::open_or_create_store(&config)?;
    Ok((config, db))
}
