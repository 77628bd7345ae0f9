//! Address parsing, resolution and local-interface enumeration.
//!
//! Grounded on sockpuppet's `Address`/`AddressImpl` pair
//! (`original_source/include/sockpuppet/address.h`,
//! `original_source/src/address_impl.cpp`): a handle that is constructed from
//! a URI, a host/service pair, or a bare port, and that can report its host,
//! service, port and family. `local_addresses()` mirrors
//! `AddressPriv::LocalAddresses()` (`original_source/src/address_priv_unix.cpp`),
//! which walks `getifaddrs()` and skips loopback interfaces.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// A resolved network address, usable for both UDP and TCP.
///
/// Thin wrapper over [`std::net::SocketAddr`] that adds the URI/host-service
/// parsing convenience the rest of this crate's constructors rely on. Unlike
/// sockpuppet's `Address`, resolution happens eagerly at construction time
/// and a single [`Address`] holds exactly one resolved [`SocketAddr`] — when
/// a query resolves to several candidates this picks the first, matching
/// `getaddrinfo`'s own precedence-ordered result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(SocketAddr);

impl Address {
    /// Parse `[scheme://] host [':' port] ['/' path]`, resolving `host` if
    /// it is not already numeric and a service name (a scheme or an
    /// explicit non-numeric port) via the OS service database. A host with
    /// neither a port nor a scheme resolves against a default service of
    /// port `0`.
    pub fn parse(uri: &str) -> Result<Address> {
        if uri.is_empty() {
            return Err(Error::address_resolution(uri, not_found(uri)));
        }
        let dissected = dissect(uri);
        let port = resolve_port(&dissected).map_err(|e| Error::address_resolution(uri, e))?;
        let query = if dissected.host.contains(':') && !dissected.host.starts_with('[') {
            format!("[{}]:{port}", dissected.host)
        } else {
            format!("{}:{port}", dissected.host)
        };
        let mut addrs = query
            .to_socket_addrs()
            .map_err(|e| Error::address_resolution(uri, e))?;
        addrs
            .next()
            .map(Address)
            .ok_or_else(|| Error::address_resolution(uri, not_found(uri)))
    }

    /// Resolve a separate host and service/port string, e.g.
    /// `Address::new("example.com", "https")`.
    pub fn new(host: &str, service: &str) -> Result<Address> {
        Address::parse(&format!("{host}:{service}"))
    }

    /// A loopback address bound to `port` (`0` requests an OS-assigned
    /// ephemeral port).
    pub fn from_port(port: u16) -> Address {
        Address(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// Wrap an already-resolved [`SocketAddr`].
    pub fn from_socket_addr(addr: SocketAddr) -> Address {
        Address(addr)
    }

    /// The underlying [`SocketAddr`].
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// The numeric host part, e.g. `"192.0.2.1"` or `"::1"`.
    pub fn host(&self) -> String {
        self.0.ip().to_string()
    }

    /// The numeric port.
    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// Whether this is an IPv6 address.
    pub fn is_v6(&self) -> bool {
        self.0.is_ipv6()
    }

    /// Enumerate this machine's non-loopback network interface addresses.
    ///
    /// Best-effort: a platform that cannot enumerate interfaces returns an
    /// empty vector rather than an error.
    pub fn local_addresses() -> Vec<Address> {
        sys::local_addresses()
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Address {
        Address(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The pieces `UriDissect` (`original_source/src/address_impl.cpp`) picks
/// out of a URI: an optional scheme, the host, and an optional trailing
/// port-or-service-name suffix. Done by hand instead of with a regex crate
/// since the grammar is small and linear to walk.
struct Dissected<'a> {
    scheme: Option<&'a str>,
    host: &'a str,
    port_or_service: Option<&'a str>,
}

fn dissect(uri: &str) -> Dissected<'_> {
    let mut rest = uri;
    let mut scheme = None;
    if let Some(idx) = rest.find("://") {
        scheme = Some(&rest[..idx]);
        rest = &rest[idx + 3..];
    }
    if let Some(idx) = rest.find('/') {
        rest = &rest[..idx];
    }

    if let Some(after_bracket) = rest.strip_prefix('[') {
        if let Some(end) = after_bracket.find(']') {
            let host = &after_bracket[..end];
            let port = after_bracket[end + 1..].strip_prefix(':').filter(|p| !p.is_empty());
            return Dissected { scheme, host, port_or_service: port };
        }
    }

    // A bare (unbracketed) IPv6 literal carries several colons; only treat
    // a single trailing colon group as a port/service suffix.
    if rest.matches(':').count() == 1 {
        if let Some((host, suffix)) = rest.rsplit_once(':') {
            if !suffix.is_empty() {
                return Dissected { scheme, host, port_or_service: Some(suffix) };
            }
        }
    }
    Dissected { scheme, host: rest, port_or_service: None }
}

/// Resolve the numeric port a [`Dissected`] URI should use: an explicit
/// port/service suffix wins, then a scheme name, then the default service
/// (port `0`), mirroring `UriDissect` passing an empty service string
/// through to `getaddrinfo` when neither is present.
fn resolve_port(d: &Dissected<'_>) -> std::io::Result<u16> {
    let service = match (d.port_or_service, d.scheme) {
        (Some(s), _) => Some(s),
        (None, Some(scheme)) if !scheme.is_empty() => Some(scheme),
        _ => None,
    };
    let Some(service) = service else { return Ok(0) };
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }
    sys::lookup_service(service)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("unknown service \"{service}\"")))
}

fn not_found(query: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{query} resolved to no addresses"),
    )
}

/// Service names this crate resolves without asking the OS, consulted
/// first on unix (`getservbyname` still covers anything a sandboxed
/// environment's `/etc/services` is missing) and exclusively on Windows.
fn well_known_service_port(name: &str) -> Option<u16> {
    Some(match name.to_ascii_lowercase().as_str() {
        "http" => 80,
        "https" => 443,
        "ftp" => 21,
        "ssh" => 22,
        "telnet" => 23,
        "smtp" => 25,
        "dns" | "domain" => 53,
        "pop3" => 110,
        "imap" => 143,
        _ => return None,
    })
}

#[cfg(unix)]
mod sys {
    use super::Address;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

    /// Resolve a service name to a port, consulting the OS service
    /// database (`/etc/services` on most unixes) the way `getaddrinfo`
    /// does in the original, falling back to a small built-in table for
    /// environments without one.
    pub(super) fn lookup_service(name: &str) -> Option<u16> {
        use std::ffi::CString;
        let cname = CString::new(name).ok()?;
        let entry = unsafe { libc::getservbyname(cname.as_ptr(), std::ptr::null()) };
        if entry.is_null() {
            return super::well_known_service_port(name);
        }
        Some(u16::from_be(unsafe { (*entry).s_port } as u16))
    }

    /// Walks `getifaddrs(3)`, matching `AddressPriv::LocalAddresses` in the
    /// original: skip entries with no address, skip anything that is not
    /// `AF_INET`/`AF_INET6`, skip `IFF_LOOPBACK`.
    pub(super) fn local_addresses() -> Vec<Address> {
        let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
        if unsafe { libc::getifaddrs(&mut head) } != 0 {
            return Vec::new();
        }
        let guard = IfAddrs(head);

        let mut out = Vec::new();
        let mut it = guard.0;
        while !it.is_null() {
            let ifa = unsafe { &*it };
            it = ifa.ifa_next;

            if ifa.ifa_addr.is_null() {
                continue;
            }
            if ifa.ifa_flags & (libc::IFF_LOOPBACK as u32) != 0 {
                continue;
            }

            let family = unsafe { (*ifa.ifa_addr).sa_family } as i32;
            match family {
                libc::AF_INET => {
                    let sa = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                    let ip = Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr));
                    out.push(Address::from(SocketAddr::V4(SocketAddrV4::new(
                        ip,
                        u16::from_be(sa.sin_port),
                    ))));
                }
                libc::AF_INET6 => {
                    let sa = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
                    let ip = Ipv6Addr::from(sa.sin6_addr.s6_addr);
                    out.push(Address::from(SocketAddr::V6(SocketAddrV6::new(
                        ip,
                        u16::from_be(sa.sin6_port),
                        sa.sin6_flowinfo,
                        sa.sin6_scope_id,
                    ))));
                }
                _ => {}
            }
        }
        out
    }

    struct IfAddrs(*mut libc::ifaddrs);

    impl Drop for IfAddrs {
        fn drop(&mut self) {
            if !self.0.is_null() {
                unsafe { libc::freeifaddrs(self.0) };
            }
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::Address;
    use std::net::UdpSocket;

    /// Windows' `getservbyname` takes a `SERVENT` layout that differs
    /// between 32- and 64-bit builds; rather than risk an FFI struct
    /// mismatch, service names resolve against the built-in table only.
    pub(super) fn lookup_service(name: &str) -> Option<u16> {
        super::well_known_service_port(name)
    }

    /// Windows has no `libc::getifaddrs`; full enumeration would need the IP
    /// Helper API. Until that is pulled in, fall back to the classic
    /// connect-a-UDP-socket trick to discover the address the OS would pick
    /// to reach the outside world, which covers the common single-homed
    /// case used by this crate's own tests.
    pub(super) fn local_addresses() -> Vec<Address> {
        let probe = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        if probe.connect("8.8.8.8:80").is_err() {
            return Vec::new();
        }
        match probe.local_addr() {
            Ok(addr) => vec![Address::from(addr)],
            Err(_) => Vec::new(),
        }
    }
}
