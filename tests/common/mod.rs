#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use ferry::{
    combinators::{Barrier, WaitResult},
    Endpoint, EndpointOptions, Handler, Promise,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Starts an endpoint on an ephemeral loopback port
pub fn serve(options: EndpointOptions, handler: impl Handler) -> Endpoint {
    init_logging();
    let mut endpoint = Endpoint::new("127.0.0.1:0").unwrap();
    endpoint.init(options).unwrap();
    endpoint.set_handler(handler);
    endpoint.serve_threaded().unwrap();
    endpoint
}

pub fn target(endpoint: &Endpoint, path: &str) -> String {
    format!("{}{path}", endpoint.local_addr())
}

pub fn wait<T>(promise: &Promise<T>) -> WaitResult<T>
where
    T: Clone + Send + 'static,
{
    Barrier::new(promise).wait_for(WAIT)
}

/// Serves `reply` verbatim to every connection, once its request head has arrived
pub fn canned(reply: &'static [u8]) -> SocketAddr {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                return;
            };
            let mut head = Vec::new();
            let mut byte = [0; 1];
            while !head.ends_with(b"\r\n\r\n") {
                match stream.read(&mut byte) {
                    Ok(1) => head.push(byte[0]),
                    _ => break,
                }
            }
            let _ = stream.write_all(reply);
        }
    });

    addr
}
