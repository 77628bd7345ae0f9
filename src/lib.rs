//! Cross-platform synchronous and asynchronous UDP/TCP(+TLS) sockets built
//! around a single-threaded reactor.
//!
//! Grounded on sockpuppet (`original_source/`), a C++ socket library with
//! the same shape: a `Driver` reactor that owns exactly one thread's worth
//! of polling, synchronous socket types usable without ever touching a
//! driver, and async wrappers that register with one. This crate keeps
//! that three-layer split — [`socket`] for blocking/non-blocking use,
//! [`driver`] for the reactor itself, [`async_socket`] for sockets that
//! deliver data via callbacks on the reactor thread.
//!
//! ```no_run
//! use polysock::{Address, Driver, BufferedUdpSocket, UdpSocket, AsyncUdpSocket, Timeout};
//! use std::time::Duration;
//!
//! # fn main() -> polysock::Result<()> {
//! let driver = Driver::new()?;
//! let socket = UdpSocket::bind(Address::from_port(0))?;
//! let buffered = BufferedUdpSocket::new(socket, 8, 0)?;
//! let async_socket = AsyncUdpSocket::new_unconnected(buffered, driver.clone(), |buf, from| {
//!     println!("{} bytes from {from}", buf.len());
//! })?;
//! driver.step(Timeout::Limited(Duration::from_millis(10)))?;
//! # Ok(())
//! # }
//! ```

mod address;
mod async_socket;
mod buffer;
mod completion;
mod deadline;
mod driver;
mod error;
mod pool;
mod scheduler;
mod socket;
mod wait;

#[cfg(feature = "tls")]
mod tls;

pub use address::Address;
pub use async_socket::{AsyncTcpListener, AsyncTcpStream, AsyncUdpSocket};
pub use buffer::SendBuffer;
pub use completion::SendFuture;
pub use deadline::{Deadline, Timeout};
pub use driver::{Driver, DriverConfig, TimedTaskHandle, When};
pub use error::{Error, Result};
pub use pool::{BorrowedBuffer, BufferPool};
pub use socket::{BufferedTcpStream, BufferedUdpSocket, TcpListener, TcpStream, UdpSocket};

#[cfg(feature = "tls")]
pub use tls::{ClientTlsConfig, ServerTlsConfig};
