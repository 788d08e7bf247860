use std::time::Duration;

use qna_forum::db::clean_expired_sessions;
use qna_forum::env::{ForumConfig, load_environment};
use qna_forum::telemetry::{init_tracing, shutdown_telemetry};
use qna_forum::{Error, connect, init_rocket};
use rocket::tokio;
use tracing::{error, info};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[rocket::main]
async fn main() -> Result<(), Error> {
    if let Err(err) = load_environment() {
        eprintln!("Failed to load environment files: {}", err);
    }
    init_tracing()?;

    let config = ForumConfig::from_env()?;
    let pool = connect(&config).await?;

    let sweep_pool = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&sweep_pool).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clean expired sessions: {}", e),
            }

            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
        }
    });

    let result = init_rocket(pool, config).launch().await;
    shutdown_telemetry();

    result?;
    Ok(())
}
