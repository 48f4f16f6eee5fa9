use anyhow::Result;
use gattserver::{bt, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_module("gattserver", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    log::debug!("{config:?}");

    bt::serve(&config).await
}
