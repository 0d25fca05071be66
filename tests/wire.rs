mod common;

use std::{
    io::{Read, Write},
    net::TcpStream,
    time::Duration,
};

use ferry::{
    codec::decode_response,
    http::{Response, Status},
    server::handler_fn,
    Endpoint, EndpointOptions,
};
use pretty_assertions::assert_eq;

use common::{serve, WAIT};

fn connect(endpoint: &Endpoint) -> TcpStream {
    let stream = TcpStream::connect(endpoint.local_addr()).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    stream
}

/// Reads until the server closes the connection
fn read_all(mut stream: TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    stream.read_to_end(&mut received).unwrap();
    received
}

fn decode_all(mut received: &[u8]) -> Vec<Response> {
    let mut responses = Vec::new();
    while let Some((response, consumed)) = decode_response(received, false, true).unwrap() {
        responses.push(response);
        received = &received[consumed..];
    }
    responses
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let endpoint = serve(
        EndpointOptions::default(),
        handler_fn(|request, writer| {
            let _ = writer.send(Status::r#Ok, request.target());
        }),
    );

    let mut stream = connect(&endpoint);
    stream
        .write_all(
            b"GET /a HTTP/1.1\r\nHost: test\r\n\r\n\
              GET /b HTTP/1.1\r\nHost: test\r\n\r\n\
              GET /c HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
        )
        .unwrap();

    let bodies: Vec<_> = decode_all(&read_all(stream))
        .iter()
        .map(Response::body_text)
        .collect();
    assert_eq!(vec!["/a", "/b", "/c"], bodies);
}

#[test]
fn partial_head_times_out_with_408() {
    let endpoint = serve(
        EndpointOptions::default().header_timeout(Duration::from_millis(200)),
        handler_fn(|_, writer| {
            let _ = writer.send(Status::r#Ok, "");
        }),
    );

    let mut stream = connect(&endpoint);
    stream.write_all(b"GET / HTTP/1.1\r\nHost: te").unwrap();

    let responses = decode_all(&read_all(stream));
    assert_eq!(1, responses.len());
    assert_eq!(Status::RequestTimeout, responses[0].status());
}

#[test]
fn partial_body_times_out_with_408() {
    let endpoint = serve(
        EndpointOptions::default()
            .header_timeout(Duration::from_secs(30))
            .body_timeout(Duration::from_millis(300)),
        handler_fn(|_, writer| {
            let _ = writer.send(Status::r#Ok, "");
        }),
    );

    let mut stream = connect(&endpoint);
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: test\r\nContent-Length: 10\r\n\r\nabc")
        .unwrap();

    let responses = decode_all(&read_all(stream));
    assert_eq!(1, responses.len());
    assert_eq!(Status::RequestTimeout, responses[0].status());
}

#[test]
fn idle_connection_is_closed_quietly() {
    let endpoint = serve(
        EndpointOptions::default().keep_alive_timeout(Duration::from_millis(200)),
        handler_fn(|_, writer| {
            let _ = writer.send(Status::r#Ok, "done");
        }),
    );

    let mut stream = connect(&endpoint);
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n")
        .unwrap();

    let responses = decode_all(&read_all(stream));
    assert_eq!(1, responses.len());
    assert_eq!("done", responses[0].body_text());
}
