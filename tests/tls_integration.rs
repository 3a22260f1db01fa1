//! TLS handshake and echo round-trip over a real socket (§8 S6).

#![cfg(feature = "tls")]

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evcore::{ClientInfo, Server, ServerConfig};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

#[test]
fn tls_echo_round_trip() {
    let certified_key =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let dir = std::env::temp_dir().join(format!("evcore-tls-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, certified_key.cert.pem()).unwrap();
    std::fs::write(&key_path, certified_key.key_pair.serialize_pem()).unwrap();

    let config = ServerConfig::new(Ipv4Addr::new(127, 0, 0, 1), 0);
    let mut server = Server::new(config).expect("server binds");
    server.set_tls(&cert_path, &key_path).expect("tls configures");
    let addr = server.local_addr().expect("bound address");
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || {
        let _ = server.run(
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
    });

    thread::sleep(Duration::from_millis(150));

    let tcp = TcpStream::connect(addr).expect("connect");
    tcp.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    tcp.set_nodelay(true).unwrap();

    let cert_der = CertificateDer::from(certified_key.cert.der().to_vec());
    let mut root_store = RootCertStore::empty();
    root_store.add(cert_der).unwrap();

    let client_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let server_name = rustls::pki_types::ServerName::try_from("localhost")
        .unwrap()
        .to_owned();
    let mut conn =
        ClientConnection::new(Arc::new(client_config), server_name).expect("client connection");

    let mut tls_stream = rustls::Stream::new(&mut conn, &mut &tcp);
    tls_stream.write_all(b"secure").expect("write over tls");

    let mut buf = [0u8; 16];
    let n = tls_stream.read(&mut buf).expect("read over tls");
    assert_eq!(&buf[..n], b"secure");

    shutdown.set();
    handle.join().expect("server thread joins after shutdown");

    let _ = std::fs::remove_dir_all(&dir);
}
