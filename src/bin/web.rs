#![cfg(not(tarpaulin_include))]

use pharmacy_pos::app;
use pharmacy_pos::config::Config;
use std::env;
use std::path::PathBuf;

/// Start the JSON API over the configured workbook
///
/// The only argument is an optional path to a JSON config file; everything
/// else comes from `PHARMACY_*` environment variables.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    app::run(config).await
}
