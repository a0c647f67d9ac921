use clap::Parser;
use tokio::net::TcpListener;

use tracing::info;

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    #[arg(long, default_value_t = 40000)]
    port: u16,

    #[arg(long, default_value = "chat.protohackers.com")]
    upstream_host: String,

    #[arg(long, default_value_t = 16963)]
    upstream_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("start");

    let upstream_addr = format!("{}:{}", args.upstream_host, args.upstream_port);

    let listener = TcpListener::bind(format!("{}:{}", args.address, args.port)).await?;
    loop {
        let (socket, _) = listener.accept().await?;

        tokio::spawn(p05_mob_in_the_middle::handler(socket, upstream_addr.clone()));
    }
}
