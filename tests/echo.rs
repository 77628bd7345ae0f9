mod common;

use polysock::{Address, AsyncTcpListener, AsyncTcpStream, BufferedTcpStream, Driver, TcpListener, TcpStream, Timeout};
use rand::RngCore;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PAYLOAD_LEN: usize = 1_000_000;

fn random_payload() -> Vec<u8> {
    let mut buf = vec![0u8; PAYLOAD_LEN];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Three clients stream ~1 MB of random bytes each through a shared async
/// echo server over loopback and must get their own bytes back exactly,
/// then the driver must tear down without leaving the reactor wedged.
#[test]
fn three_concurrent_clients_echo_a_megabyte_each_then_driver_shuts_down() {
    common::init_logging();
    let driver = Driver::new().unwrap();
    let listener = TcpListener::bind(Address::from_port(0)).unwrap();
    let addr = listener.local_addr().unwrap();

    let server_streams: Arc<Mutex<Vec<Arc<Mutex<Option<AsyncTcpStream>>>>>> = Arc::new(Mutex::new(Vec::new()));
    let server_streams_for_listener = server_streams.clone();
    let listener_driver = driver.clone();
    let acceptor = AsyncTcpListener::new(listener, driver.clone(), move |stream, _peer| {
        let buffered = BufferedTcpStream::new(stream, 8, 64 * 1024).unwrap();
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
        server_streams_for_listener.lock().unwrap().push(cell);
    })
    .unwrap();

    struct Client {
        stream: AsyncTcpStream,
        payload: Vec<u8>,
        received: Arc<Mutex<Vec<u8>>>,
    }

    let mut clients = Vec::new();
    for _ in 0..3 {
        let payload = random_payload();
        let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let received_for_recv = received.clone();
        let client_stream = TcpStream::connect(addr).unwrap();
        let buffered = BufferedTcpStream::new(client_stream, 8, 64 * 1024).unwrap();
        let stream = AsyncTcpStream::new(
            buffered,
            driver.clone(),
            move |buf| received_for_recv.lock().unwrap().extend_from_slice(&buf),
            |_addr| {},
        )
        .unwrap();
        let send = stream.send(payload.clone());
        clients.push((Client { stream, payload, received }, send));
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        driver.step(Timeout::Limited(Duration::from_millis(20))).unwrap();
        let all_done = clients
            .iter()
            .all(|(c, _)| c.received.lock().unwrap().len() >= PAYLOAD_LEN);
        if all_done {
            break;
        }
        if Instant::now() > deadline {
            for (i, (c, _)) in clients.iter().enumerate() {
                panic!(
                    "client {i} only received {} of {PAYLOAD_LEN} bytes before timing out",
                    c.received.lock().unwrap().len()
                );
            }
        }
    }

    for (c, send) in &clients {
        send.wait(Timeout::Limited(Duration::from_secs(5)))
            .expect("client send never completed")
            .unwrap();
        assert_eq!(*c.received.lock().unwrap(), c.payload, "echoed bytes must match byte-for-byte");
    }

    // Disconnect every client, then drop the server side and the
    // acceptor; the driver must keep stepping without panicking on an
    // empty (but for its own wakeup socket) descriptor table.
    for (c, _) in clients {
        drop(c.stream);
    }
    for _ in 0..5 {
        driver.step(Timeout::Limited(Duration::from_millis(20))).unwrap();
    }
    server_streams.lock().unwrap().clear();
    drop(acceptor);
    driver.step(Timeout::Poll).unwrap();
}
