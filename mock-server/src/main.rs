use mock_server::HubConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let defaults = HubConfig::default();
    let config = HubConfig {
        username: std::env::var("HUB_USER").unwrap_or(defaults.username),
        password: std::env::var("HUB_PASSWORD").unwrap_or(defaults.password),
        code: std::env::var("HUB_CODE").unwrap_or(defaults.code),
    };

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, user = %config.username, "mock hub listening");
    mock_server::run_with(listener, config).await
}
