//! Broadcast fan-out over real sockets (§8 S5).

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::thread;
use std::time::Duration;

use evcore::{ClientInfo, Server, ServerConfig};

#[test]
fn broadcast_reaches_other_live_peers_only() {
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
                *keepalive = true;
                *broadcast = input == b"shout";
                b"ack".to_vec()
            },
        );
    });

    thread::sleep(Duration::from_millis(100));

    let mut a = TcpStream::connect(addr).expect("connect a");
    let mut b = TcpStream::connect(addr).expect("connect b");
    let mut c = TcpStream::connect(addr).expect("connect c");
    for s in [&mut a, &mut b, &mut c] {
        s.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    }
    thread::sleep(Duration::from_millis(50));

    a.write_all(b"shout").unwrap();

    let mut buf = [0u8; 16];
    let n = a.read(&mut buf).expect("a reads its own ack");
    assert_eq!(&buf[..n], b"ack");

    let n = b.read(&mut buf).expect("b reads the broadcast");
    assert_eq!(&buf[..n], b"ack");

    let n = c.read(&mut buf).expect("c reads the broadcast");
    assert_eq!(&buf[..n], b"ack");

    shutdown.set();
    handle.join().expect("server thread joins after shutdown");
}
