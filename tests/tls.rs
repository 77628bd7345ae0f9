#![cfg(feature = "tls")]

mod common;

use polysock::{
    Address, AsyncTcpListener, AsyncTcpStream, BufferedTcpStream, ClientTlsConfig, Driver, ServerTlsConfig,
    TcpListener, TcpStream, Timeout,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// Generates a throwaway self-signed certificate for `localhost`, the same
/// role `rcgen` plays in `rustls`'s own test suite.
fn write_self_signed(dir: &Path) -> (PathBuf, PathBuf) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::File::create(&cert_path)
        .unwrap()
        .write_all(certified.cert.pem().as_bytes())
        .unwrap();
    std::fs::File::create(&key_path)
        .unwrap()
        .write_all(certified.key_pair.serialize_pem().as_bytes())
        .unwrap();
    (cert_path, key_path)
}

#[test]
fn tls_handshake_then_echo() {
    common::init_logging();
    let dir = std::env::temp_dir().join(format!("polysock-tls-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let (cert_path, key_path) = write_self_signed(&dir);

    let server_config = ServerTlsConfig::from_pem_files(&cert_path, &key_path).unwrap();
    let client_config = ClientTlsConfig::trusting_ca(&cert_path).unwrap();

    let driver = Driver::new().unwrap();
    let listener = TcpListener::bind(Address::from_port(0)).unwrap();
    let addr = listener.local_addr().unwrap();

    let accepted: Arc<Mutex<Vec<Arc<Mutex<Option<AsyncTcpStream>>>>>> = Arc::new(Mutex::new(Vec::new()));
    let accepted_for_listener = accepted.clone();
    let listener_driver = driver.clone();
    let _acceptor = AsyncTcpListener::new(listener, driver.clone(), move |stream, _peer| {
        let buffered = BufferedTcpStream::new(stream, 4, 1024).unwrap();
        let cell: Arc<Mutex<Option<AsyncTcpStream>>> = Arc::new(Mutex::new(None));
        let cell_for_echo = cell.clone();
        let s = AsyncTcpStream::from_accepted_tls(
            buffered,
            listener_driver.clone(),
            &server_config,
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

    let client_stream = TcpStream::connect(addr).unwrap();
    let client_buffered = BufferedTcpStream::new(client_stream, 4, 1024).unwrap();
    let (tx, rx) = mpsc::channel();
    let client = AsyncTcpStream::connect_tls(
        client_buffered,
        driver.clone(),
        &client_config,
        "localhost",
        move |buf| tx.send(buf.to_vec()).unwrap(),
        |_addr| {},
    )
    .unwrap();

    // The handshake has to complete before this payload is visible on the
    // wire; it sits queued on the stream until then.
    let sent = client.send(b"hello over tls".to_vec());

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        driver.step(Timeout::Limited(Duration::from_millis(50))).unwrap();
        if let Ok(payload) = rx.try_recv() {
            assert_eq!(payload, b"hello over tls");
            sent.wait(Timeout::Limited(Duration::from_secs(1)))
                .expect("send never completed")
                .unwrap();
            std::fs::remove_dir_all(&dir).ok();
            return;
        }
        if Instant::now() > deadline {
            panic!("tls echo never arrived");
        }
    }
}
