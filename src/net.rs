// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Socket setup shared by the endpoint and the client

use std::{
    io::{Error, ErrorKind, Result},
    net::{SocketAddr, ToSocketAddrs},
};

use socket2::{Domain, Protocol, Socket, Type};

/// Resolves `addr` to its first socket address.
pub(crate) fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing"))
}

/// Binds a non-blocking listening socket.
///
/// With `reuse_addr`, the address can be bound again right after the previous listener closed,
/// even while old connections linger in `TIME_WAIT`.
pub(crate) fn bind_listener(
    addr: SocketAddr,
    reuse_addr: bool,
    backlog: i32,
) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if reuse_addr {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Opens a non-blocking connection to `addr`. The connection may still be in progress when this
/// returns; completion is signalled by the stream becoming writable.
pub(crate) fn connect(addr: SocketAddr) -> Result<mio::net::TcpStream> {
    let stream = mio::net::TcpStream::connect(addr)?;
    // not fatal, only latency
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolves_localhost() {
        let addr = resolve("localhost:9080").unwrap();
        assert_eq!(9080, addr.port());
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn ephemeral_port_is_assigned() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), true, 16).unwrap();
        assert_ne!(0, listener.local_addr().unwrap().port());
    }

    #[test]
    fn reuse_addr_allows_immediate_rebind() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), true, 16).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(bind_listener(addr, true, 16).is_ok());
    }
}
