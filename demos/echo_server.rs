//! Plaintext echo server demonstrating `evcore::Server` as an external
//! consumer would use it.

use std::net::Ipv4Addr;

use clap::Parser;
use evcore::{ClientInfo, Server, ServerConfig};
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: Ipv4Addr,
    #[arg(long, default_value_t = 9090)]
    port: u16,
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ServerConfig::new(args.host, args.port).with_thread_size(args.threads);
    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start server: {e}");
            std::process::exit(1);
        }
    };

    info!(host = %args.host, port = args.port, "echo server listening");

    let result = server.run(
        |input: &[u8],
         keepalive: &mut bool,
         broadcast: &mut bool,
         _client: &mut ClientInfo,
         _filter: &mut evcore::BroadcastFilter| {
            *keepalive = input != b"close\n" && input != b"close";
            *broadcast = false;
            input.to_vec()
        },
    );

    if let Err(e) = result {
        eprintln!("server exited with error: {e}");
        std::process::exit(1);
    }
}
