//! End-to-end tests driving `Server` over real TCP sockets (§8 S1/S3/S4).

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::thread;
use std::time::Duration;

use evcore::{ClientInfo, Server, ServerConfig};

#[test]
fn echo_round_trip_with_keepalive() {
    let config = ServerConfig::new(Ipv4Addr::new(127, 0, 0, 1), 0).with_thread_size(0);
    let mut server = Server::new(config).expect("server binds");
    let addr = server.local_addr().expect("bound address");
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || {
        let _ = server.run(
            |input: &[u8],
             keepalive: &mut bool,
             broadcast: &mut bool,
             client: &mut ClientInfo,
             _filter: &mut evcore::BroadcastFilter| {
                *keepalive = true;
                *broadcast = false;
                format!("{}:{}", client.count, String::from_utf8_lossy(input)).into_bytes()
            },
        );
    });

    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.write_all(b"hello").unwrap();

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read reply");
    assert_eq!(&buf[..n], b"1:hello");

    stream.write_all(b"again").unwrap();
    let n = stream.read(&mut buf).expect("read second reply");
    assert_eq!(&buf[..n], b"2:again");

    shutdown.set();
    handle.join().expect("server thread joins after shutdown");
}

#[test]
fn keepalive_false_closes_after_one_reply() {
    let config = ServerConfig::new(Ipv4Addr::new(127, 0, 0, 1), 0);
    let mut server = Server::new(config).expect("server binds");
    let addr = server.local_addr().expect("bound address");
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || {
        let _ = server.run(
            |input: &[u8],
             keepalive: &mut bool,
             broadcast: &mut bool,
             _client: &mut ClientInfo,
             _filter: &mut evcore::BroadcastFilter| {
                *keepalive = false;
                *broadcast = false;
                input.to_vec()
            },
        );
    });

    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.write_all(b"bye").unwrap();

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read reply");
    assert_eq!(&buf[..n], b"bye");

    // Server closed its side after the reply; a second read observes EOF.
    let n2 = stream.read(&mut buf).expect("read after close");
    assert_eq!(n2, 0);

    shutdown.set();
    handle.join().expect("server thread joins after shutdown");
}

#[test]
fn shutdown_flag_stops_the_loop_without_a_connection() {
    let config = ServerConfig::new(Ipv4Addr::new(127, 0, 0, 1), 0);
    let mut server = Server::new(config).expect("server binds");
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

    thread::sleep(Duration::from_millis(50));
    shutdown.set();
    handle.join().expect("server thread joins promptly after shutdown");
}
