mod common;

use std::time::Duration;

use ferry::{
    client::{Client, ClientOptions},
    combinators::WaitResult,
    http::Status,
    server::handler_fn,
    Endpoint, EndpointOptions, Error,
};

use common::{init_logging, serve, target, wait};

#[test]
fn serve_requires_a_handler() {
    init_logging();
    let mut endpoint = Endpoint::new("127.0.0.1:0").unwrap();
    endpoint.init(Endpoint::options()).unwrap();

    assert!(matches!(
        endpoint.serve_threaded(),
        Err(Error::InvalidOptions(_))
    ));
    assert!(!endpoint.is_serving());
}

#[test]
fn options_are_validated() {
    init_logging();
    let mut endpoint = Endpoint::new("127.0.0.1:0").unwrap();

    assert!(matches!(
        endpoint.init(EndpointOptions::default().threads(0)),
        Err(Error::InvalidOptions(_))
    ));
    assert!(matches!(
        endpoint.init(EndpointOptions::default().backlog(0)),
        Err(Error::InvalidOptions(_))
    ));
    assert!(matches!(
        endpoint.init(EndpointOptions::default().header_timeout(Duration::ZERO)),
        Err(Error::InvalidOptions(_))
    ));
    endpoint.init(EndpointOptions::default()).unwrap();
    assert!(matches!(
        endpoint.init(EndpointOptions::default()),
        Err(Error::InvalidOptions(_))
    ));
}

#[test]
fn init_assigns_a_port() {
    init_logging();
    let mut endpoint = Endpoint::new("127.0.0.1:0").unwrap();
    endpoint.init(EndpointOptions::default()).unwrap();

    assert_ne!(0, endpoint.port());
    assert_eq!(endpoint.port(), endpoint.local_addr().port());
}

#[test]
fn serve_without_init_uses_defaults() {
    init_logging();
    let mut endpoint = Endpoint::new("127.0.0.1:0").unwrap();
    endpoint.set_handler(handler_fn(|_, writer| {
        let _ = writer.send(Status::NoContent, "");
    }));
    endpoint.serve_threaded().unwrap();
    assert!(endpoint.is_serving());

    let client = Client::new(ClientOptions::default()).unwrap();
    let response = client.get(&target(&endpoint, "/")).send();
    match wait(&response) {
        WaitResult::Resolved(response) => assert_eq!(Status::NoContent, response.status()),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn shutdown_releases_the_address() {
    let mut endpoint = serve(
        EndpointOptions::default().threads(3).reuse_addr(true),
        handler_fn(|_, writer| {
            let _ = writer.send(Status::r#Ok, "one");
        }),
    );
    let addr = endpoint.local_addr();

    let client = Client::new(ClientOptions::default()).unwrap();
    let response = client.get(&target(&endpoint, "/")).send();
    assert!(matches!(wait(&response), WaitResult::Resolved(_)));

    endpoint.shutdown().unwrap();
    endpoint.shutdown().unwrap();
    assert!(!endpoint.is_serving());
    assert!(matches!(
        endpoint.serve_threaded(),
        Err(Error::InvalidOptions(_))
    ));

    let mut again = Endpoint::new(addr).unwrap();
    again
        .init(EndpointOptions::default().reuse_addr(true))
        .unwrap();
    again.set_handler(handler_fn(|_, writer| {
        let _ = writer.send(Status::r#Ok, "two");
    }));
    again.serve_threaded().unwrap();

    let response = client.get(&target(&again, "/")).send();
    match wait(&response) {
        WaitResult::Resolved(response) => assert_eq!("two", response.body_text()),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn dropping_an_endpoint_stops_it() {
    let endpoint = serve(
        EndpointOptions::default().threads(2),
        handler_fn(|_, writer| {
            let _ = writer.send(Status::r#Ok, "");
        }),
    );
    let addr = endpoint.local_addr();
    drop(endpoint);

    let client = Client::new(ClientOptions::default()).unwrap();
    let response = client.get(&addr.to_string()).send();
    assert!(matches!(
        wait(&response),
        WaitResult::Rejected(Error::Transport(_))
    ));
}
