use clap::Parser;
use tracing::Level;
use xs_bench::config::Args;
use xs_bench::{EchoServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from(Args::parse());

    // initialize tracing
    let level = if config.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!("idle timeout {}s", config.idle_timeout.as_secs());
    let server = EchoServer::bind(&config).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("unable to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
