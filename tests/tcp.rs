mod common;

use polysock::{Address, AsyncTcpListener, AsyncTcpStream, BufferedTcpStream, Driver, TcpListener, TcpStream, Timeout};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn sync_tcp_echo_round_trip() {
    common::init_logging();
    let listener = TcpListener::bind(Address::from_port(0)).unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _peer) = loop {
            if let Some(accepted) = listener.accept(Timeout::Limited(Duration::from_secs(2))).unwrap() {
                break accepted;
            }
        };
        let mut buf = [0u8; 64];
        let n = loop {
            match stream.receive(&mut buf, Timeout::Limited(Duration::from_secs(2))) {
                Ok(Some(n)) => break n,
                Ok(None) => continue,
                Err(e) => panic!("server receive failed: {e}"),
            }
        };
        stream.send(&buf[..n], Timeout::Limited(Duration::from_secs(2))).unwrap();
    });

    let client = TcpStream::connect(addr).unwrap();
    client.send(b"ping", Timeout::Limited(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 64];
    let n = loop {
        match client.receive(&mut buf, Timeout::Limited(Duration::from_secs(2))) {
            Ok(Some(n)) => break n,
            Ok(None) => continue,
            Err(e) => panic!("client receive failed: {e}"),
        }
    };
    assert_eq!(&buf[..n], b"ping");
    server.join().unwrap();
}

/// Drives an accepted connection's echo behavior from `on_connect`,
/// matching how `sockpuppet_chat_server.cpp` builds its async client
/// object inside the connect callback.
#[test]
fn async_tcp_echo_round_trip() {
    common::init_logging();
    let driver = Driver::new().unwrap();
    let listener = TcpListener::bind(Address::from_port(0)).unwrap();
    let addr = listener.local_addr().unwrap();

    // Keeps every accepted AsyncTcpStream alive for the test's duration; it
    // would otherwise drop (and detach) at the end of the connect closure.
    let accepted: Arc<Mutex<Vec<Arc<Mutex<Option<AsyncTcpStream>>>>>> = Arc::new(Mutex::new(Vec::new()));
    let accepted_for_listener = accepted.clone();
    let listener_driver = driver.clone();
    let _acceptor = AsyncTcpListener::new(listener, driver.clone(), move |stream, _peer| {
        let buffered = BufferedTcpStream::new(stream, 4, 1024).unwrap();
        let cell: Arc<Mutex<Option<AsyncTcpStream>>> = Arc::new(Mutex::new(None));
        let cell_for_echo = cell.clone();
        let s = AsyncTcpStream::new(
            buffered,
            listener_driver.clone(),
            move |buf| {
                if let Some(echoed) = cell_for_echo.lock().unwrap().as_ref() {
                    let _ = echoed.send(buf.to_vec());
                }
            },
            |_addr| {},
        )
        .unwrap();
        *cell.lock().unwrap() = Some(s);
        accepted_for_listener.lock().unwrap().push(cell);
    })
    .unwrap();

    let client = TcpStream::connect(addr).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match client.send(b"ping", Timeout::Poll) {
            Ok(4) => break,
            Ok(_) => {}
            Err(e) => panic!("client send failed: {e}"),
        }
        if Instant::now() > deadline {
            panic!("client never finished connecting");
        }
        driver.step(Timeout::Limited(Duration::from_millis(10))).unwrap();
    }

    let mut buf = [0u8; 64];
    loop {
        driver.step(Timeout::Limited(Duration::from_millis(10))).unwrap();
        match client.receive(&mut buf, Timeout::Poll) {
            Ok(Some(n)) => {
                assert_eq!(&buf[..n], b"ping");
                break;
            }
            Ok(None) => {
                if Instant::now() > deadline {
                    panic!("echo never arrived");
                }
            }
            Err(e) => panic!("client receive failed: {e}"),
        }
    }
}
