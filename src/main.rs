mod classify;
mod cli;
mod config;
mod logger;
mod quote;
mod rewrite;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "lit-sandbox start");

    match cli::run() {
        Ok(result) => {
            info!("lit-sandbox finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "lit-sandbox failed");
            Err(err)
        }
    }
}
