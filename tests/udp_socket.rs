mod common;

use polysock::{Address, AsyncUdpSocket, BufferedUdpSocket, Driver, Timeout, UdpSocket};
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[test]
fn sync_udp_round_trip() {
    common::init_logging();
    let a = UdpSocket::bind(Address::from_port(0)).unwrap();
    let b = UdpSocket::bind(Address::from_port(0)).unwrap();
    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();

    b.send_to(b"hello", a_addr, Timeout::Limited(Duration::from_secs(1))).unwrap();
    let mut buf = [0u8; 64];
    let (n, from) = a
        .receive_from(&mut buf, Timeout::Limited(Duration::from_secs(1)))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(from, b_addr);
}

#[test]
fn async_udp_round_trip_via_driver() {
    common::init_logging();
    let driver = Driver::new().unwrap();

    let a = UdpSocket::bind(Address::from_port(0)).unwrap();
    let a_addr = a.local_addr().unwrap();
    let a_buffered = BufferedUdpSocket::new(a, 4, 1024).unwrap();
    let (tx, rx) = mpsc::channel();
    let _async_a = AsyncUdpSocket::new_unconnected(a_buffered, driver.clone(), move |buf, from| {
        tx.send((buf.to_vec(), from)).unwrap();
    })
    .unwrap();

    let b = UdpSocket::bind(Address::from_port(0)).unwrap();
    let b_buffered = BufferedUdpSocket::new(b, 4, 1024).unwrap();
    let async_b = AsyncUdpSocket::new_unconnected(b_buffered, driver.clone(), |_buf, _from| {}).unwrap();

    let send = async_b.send_to(b"ping".to_vec(), a_addr);

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        driver.step(Timeout::Limited(Duration::from_millis(50))).unwrap();
        if let Ok((payload, _from)) = rx.try_recv() {
            assert_eq!(payload, b"ping");
            send.wait(Timeout::Limited(Duration::from_secs(1))).expect("send never completed").unwrap();
            return;
        }
    }
    panic!("datagram never arrived");
}
