// Web backend entry point

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use bingo_downloader_lib::web::rate_limit::spawn_cleanup;
use bingo_downloader_lib::web::{build_state, create_router};
use bingo_downloader_lib::{logging, Config};

const RATE_LIMIT_CLEANUP_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let config = Config::from_env()?;
    let addr = config.bind_addr();
    info!(
        download_dir = %config.download_dir.display(),
        rate_limit = config.rate_limit_enabled,
        api_key = config.api_key_enabled,
        "Starting Bingo Downloader Web"
    );

    let state = build_state(config).await?;
    spawn_cleanup(state.clone(), RATE_LIMIT_CLEANUP_PERIOD);
    let app = create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
