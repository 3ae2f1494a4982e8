use std::future::IntoFuture;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use inmemory_messaging::config::{load_config, ConfigFile, Environment};
use inmemory_messaging::logging::init_logging;
use inmemory_messaging::Broker;

#[derive(Parser)]
#[command(name = "aws-messaging-local", about = "Local Amazon SQS and SNS services")]
struct Args {
    /// Host name used in queue URLs and notification links
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value = "9324")]
    sqs_port: u16,
    #[arg(long, default_value = "9911")]
    sns_port: u16,
    #[arg(long, default_value = "us-east-1")]
    region: String,
    #[arg(long, default_value = "000000000000")]
    account_id: String,
    /// TOML file with environment overrides and seed queues/topics
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long)]
    disable_deduplication: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level).context("failed to install tracing subscriber")?;

    let config = match args.config {
        Some(ref path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let mut env = Environment {
        account_id: args.account_id,
        region: args.region,
        host: args.host,
        sqs_port: args.sqs_port,
        sns_port: args.sns_port,
        deduplication: !args.disable_deduplication,
        ..Environment::default()
    };
    env.apply(&config.environment);

    let broker = Broker::new(env, config.seeds).await?;
    let sweeper = broker.spawn_sweeper();

    let sqs_addr = broker.env().sqs_bind_addr()?;
    let sns_addr = broker.env().sns_bind_addr()?;
    let sqs_listener = tokio::net::TcpListener::bind(sqs_addr)
        .await
        .with_context(|| format!("failed to bind SQS listener on {sqs_addr}"))?;
    let sns_listener = tokio::net::TcpListener::bind(sns_addr)
        .await
        .with_context(|| format!("failed to bind SNS listener on {sns_addr}"))?;
    info!(sqs = %sqs_addr, sns = %sns_addr, "aws-messaging-local listening");

    let result = tokio::select! {
        r = axum::serve(sqs_listener, broker.sqs_router()).into_future() => r.context("SQS server failed"),
        r = axum::serve(sns_listener, broker.sns_router()).into_future() => r.context("SNS server failed"),
        r = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            r.context("failed to listen for shutdown signal")
        }
    };
    sweeper.abort();
    result
}
