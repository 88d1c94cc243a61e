mod modes;
mod region;
mod service;
mod source;

use anyhow::Result;
use dotenvy::dotenv;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt().with_target(false).init();
    modes::run_from_env().await
}
