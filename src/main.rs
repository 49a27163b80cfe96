use hows_sophie::{config::Config, worker};
use log::{error, info};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenvy::dotenv().ok();

    let config = Config::load().expect("Failed to load configuration");

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received CTRL+C, shutting down");
            }
            token.cancel();
        }
    });

    if let Err(e) = worker::run(config, token).await {
        error!("hows-sophie stopped: {e}");
        std::process::exit(1);
    }
}
