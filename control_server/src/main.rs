use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use clap::Parser;
use control_server::{pubsub::NamedPubSub, router};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address the HTTP server listens on
    #[clap(long, default_value = "127.0.0.1:8000")]
    server_address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let pubsub = Arc::new(NamedPubSub::new());

    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving control server on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(pubsub).into_make_service())
        .await?;

    Ok(())
}
