mod common;

use std::{
    io::ErrorKind,
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use fake::{faker::lorem::en::Paragraph, Fake};
use ferry::{
    client::{Client, ClientOptions},
    combinators::{when_all, WaitResult},
    http::{Method, Status},
    server::handler_fn,
    EndpointOptions, Error, Handler, Violation,
};
use pretty_assertions::assert_eq;

use common::{serve, target, wait};

fn hello() -> impl Handler {
    handler_fn(|_, writer| {
        let _ = writer.send(Status::r#Ok, "Hello, World!");
    })
}

#[test]
fn concurrent_requests_all_resolve() {
    let endpoint = serve(EndpointOptions::default().threads(2).reuse_addr(true), hello());
    let client = Client::new(
        ClientOptions::default()
            .threads(1)
            .max_connections_per_host(1)
            .keep_alive(true),
    )
    .unwrap();

    let builder = client.get(&target(&endpoint, "/"));
    let responses: Vec<_> = (0..3).map(|_| builder.send()).collect();

    let resolved = Arc::new(AtomicUsize::new(0));
    for response in &responses {
        let resolved = resolved.clone();
        response.then(
            move |response| {
                if response.status() == Status::r#Ok {
                    resolved.fetch_add(1, Ordering::SeqCst);
                }
            },
            |_| {},
        );
    }

    let all = when_all(responses);
    match wait(&all) {
        WaitResult::Resolved(responses) => {
            let bodies: Vec<_> = responses.iter().map(|r| r.body_text()).collect();
            assert_eq!(vec!["Hello, World!"; 3], bodies);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(3, resolved.load(Ordering::SeqCst));

    client.shutdown();
}

#[test]
fn many_requests_over_several_threads() {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = served.clone();
    let endpoint = serve(
        EndpointOptions::default().threads(4),
        handler_fn(move |request, writer| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = writer.send(Status::r#Ok, request.target());
        }),
    );
    let client = Client::new(
        ClientOptions::default()
            .threads(3)
            .max_connections_per_host(4),
    )
    .unwrap();

    let responses: Vec<_> = (0..48)
        .map(|i| client.get(&target(&endpoint, &format!("/item/{i}"))).send())
        .collect();

    let responses = match wait(&when_all(responses)) {
        WaitResult::Resolved(responses) => responses,
        other => panic!("unexpected outcome: {other:?}"),
    };
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(format!("/item/{i}"), response.body_text());
    }
    assert_eq!(48, served.load(Ordering::SeqCst));
}

#[test]
fn body_and_headers_reach_the_handler() {
    let endpoint = serve(
        EndpointOptions::default(),
        handler_fn(|request, writer| {
            let kind = request.headers().get("x-kind").unwrap_or("none").to_owned();
            writer.add_header("X-Kind", kind);
            let _ = writer.send(Status::Created, request.body());
        }),
    );
    let client = Client::new(ClientOptions::default()).unwrap();

    let payload: String = Paragraph(3..6).fake();
    let response = client
        .post(&target(&endpoint, "/notes"))
        .header("X-Kind", "note")
        .body(payload.clone())
        .send();

    match wait(&response) {
        WaitResult::Resolved(response) => {
            assert_eq!(Status::Created, response.status());
            assert_eq!(Some("note"), response.headers().get("x-kind"));
            assert_eq!(payload, response.body_text());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn non_success_status_resolves() {
    let endpoint = serve(
        EndpointOptions::default(),
        handler_fn(|_, writer| {
            let _ = writer.send(Status::NotFound, "nothing here");
        }),
    );
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client.request(Method::Get, &target(&endpoint, "/missing"));
    match wait(&response) {
        WaitResult::Resolved(response) => {
            assert_eq!(Status::NotFound, response.status());
            assert_eq!("nothing here", response.body_text());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn omitted_send_answers_500() {
    let endpoint = serve(EndpointOptions::default(), handler_fn(|_, _| {}));
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client.get(&target(&endpoint, "/")).send();
    match wait(&response) {
        WaitResult::Resolved(response) => {
            assert_eq!(Status::InternalServerError, response.status())
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn double_send_is_refused_and_first_response_wins() {
    let refused = Arc::new(Mutex::new(Vec::new()));
    let record = refused.clone();
    let endpoint = serve(
        EndpointOptions::default(),
        handler_fn(move |_, writer| {
            let _ = writer.send(Status::r#Ok, "first");
            if let Err(e) = writer.send(Status::r#Ok, "second") {
                record.lock().unwrap().push(e);
            }
        }),
    );
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client.get(&target(&endpoint, "/")).send();
    match wait(&response) {
        WaitResult::Resolved(response) => assert_eq!("first", response.body_text()),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let refused = refused.lock().unwrap();
    assert_eq!(1, refused.len());
    assert!(matches!(
        refused[0],
        Error::Contract(Violation::DoubleSend)
    ));
}

#[test]
fn panicking_handler_answers_500() {
    let endpoint = serve(
        EndpointOptions::default(),
        handler_fn(|_, _| panic!("handler failure")),
    );
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client.get(&target(&endpoint, "/")).send();
    match wait(&response) {
        WaitResult::Resolved(response) => {
            assert_eq!(Status::InternalServerError, response.status())
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn oversized_payload_is_refused() {
    let endpoint = serve(EndpointOptions::default().max_payload(64), hello());
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client
        .post(&target(&endpoint, "/upload"))
        .body(vec![b'x'; 1024])
        .send();
    match wait(&response) {
        WaitResult::Resolved(response) => assert_eq!(Status::ContentTooLarge, response.status()),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn closed_port_rejects_with_transport_error() {
    common::init_logging();
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client.get(&format!("127.0.0.1:{port}")).send();
    match wait(&response) {
        WaitResult::Rejected(error) => {
            assert!(matches!(error, Error::Transport(_)));
            assert_eq!(Some(ErrorKind::ConnectionRefused), error.kind());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn silent_server_times_out() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client
        .get(&listener.local_addr().unwrap().to_string())
        .timeout(Duration::from_millis(200))
        .send();
    match wait(&response) {
        WaitResult::Rejected(Error::Timeout(after)) => {
            assert_eq!(Duration::from_millis(200), after)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn shutdown_rejects_outstanding_requests() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client
        .get(&listener.local_addr().unwrap().to_string())
        .send();
    client.shutdown();

    assert!(matches!(response.error(), Some(Error::Shutdown)));
}

#[test]
fn continuations_run_on_an_io_thread() {
    let endpoint = serve(
        EndpointOptions::default(),
        handler_fn(|_, writer| {
            thread::sleep(Duration::from_millis(50));
            let _ = writer.send(Status::r#Ok, "");
        }),
    );
    let client = Client::new(ClientOptions::default()).unwrap();

    let thread_name = client
        .get(&target(&endpoint, "/"))
        .send()
        .then(|_| thread::current().name().map(str::to_owned), |_| {});

    match wait(&thread_name) {
        WaitResult::Resolved(Some(name)) => assert!(name.starts_with("ferry-io-"), "{name}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn requests_without_keep_alive() {
    let endpoint = serve(EndpointOptions::default(), hello());
    let client = Client::new(ClientOptions::default().keep_alive(false)).unwrap();

    let responses: Vec<_> = (0..5)
        .map(|_| client.get(&target(&endpoint, "/")).send())
        .collect();
    match wait(&when_all(responses)) {
        WaitResult::Resolved(responses) => {
            assert!(responses.iter().all(|r| !r.keep_alive()));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn unlisted_status_resolves() {
    let addr = common::canned(b"HTTP/1.1 418 I'm a teapot\r\nContent-Length: 5\r\n\r\nshort");
    let client = Client::new(ClientOptions::default()).unwrap();

    let response = client.get(&addr.to_string()).send();
    match wait(&response) {
        WaitResult::Resolved(response) => {
            assert_eq!(418, response.status().as_u16());
            assert_eq!(Status::Other(418), response.status());
            assert_eq!("short", response.body_text());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn absurd_content_length_rejects_and_io_thread_survives() {
    let addr = common::canned(b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\n");
    let endpoint = serve(EndpointOptions::default(), hello());
    let client = Client::new(ClientOptions::default().threads(1)).unwrap();

    let response = client.get(&addr.to_string()).send();
    assert!(matches!(
        wait(&response),
        WaitResult::Rejected(Error::Protocol(_))
    ));

    let response = client.get(&target(&endpoint, "/")).send();
    match wait(&response) {
        WaitResult::Resolved(response) => assert_eq!("Hello, World!", response.body_text()),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
