use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = fractal_server::ServerConfig::from_env()?;
    let service = Arc::new(config.service());

    let listener = tokio::net::TcpListener::bind(config.address).await?;
    tracing::info!(
        address = %config.address,
        binary = %config.binary.display(),
        "fractal server listening"
    );
    axum::serve(listener, fractal_server::app(service)).await?;
    Ok(())
}
