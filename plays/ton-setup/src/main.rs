use std::path::Path;

use clap::Parser;
use ton_setup::{
    cli::{Args, LogConfig},
    config::load_dotenv,
    DOTENV_FILE,
};

#[tokio::main]
async fn main() {
    // .env first so clap's env fallbacks can see it
    load_dotenv(Path::new(DOTENV_FILE));
    let args = Args::parse();
    LogConfig::from_args(&args).init();

    match ton_setup::run(args).await {
        Ok(report) => {
            tracing::info!("Service file: {}", report.unit_file.display());
            if let Some(installed) = report.installed_unit {
                tracing::info!("Installed as: {}", installed.display());
            }
        }
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}
