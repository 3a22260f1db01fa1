//! TLS echo server demonstrating `Server::set_tls`.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use evcore::{ClientInfo, Server, ServerConfig};
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: Ipv4Addr,
    #[arg(long, default_value_t = 9443)]
    port: u16,
    #[arg(long)]
    cert: PathBuf,
    #[arg(long)]
    key: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ServerConfig::new(args.host, args.port);
    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start server: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.set_tls(&args.cert, &args.key) {
        eprintln!("failed to configure TLS: {e}");
        std::process::exit(1);
    }
    info!(host = %args.host, port = args.port, "TLS echo server listening");

    let result = server.run(
        |input: &[u8],
         keepalive: &mut bool,
         broadcast: &mut bool,
         _client: &mut ClientInfo,
         _filter: &mut evcore::BroadcastFilter| {
            *keepalive = true;
            *broadcast = false;
            input.to_vec()
        },
    );

    if let Err(e) = result {
        eprintln!("server exited with error: {e}");
        std::process::exit(1);
    }
}
