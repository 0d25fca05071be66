use std::{io::Result, thread, time::Duration};

use ferry::{http::Status, server::handler_fn, Endpoint, EndpointOptions};

fn main() -> Result<()> {
    env_logger::init();

    let mut server = Endpoint::new("127.0.0.1:9080").map_err(std::io::Error::other)?;
    server
        .init(EndpointOptions::default().threads(2).reuse_addr(true))
        .map_err(std::io::Error::other)?;
    server.set_handler(handler_fn(|request, writer| {
        let body = match request.target() {
            "/" => "Hello, World!".to_owned(),
            target => format!("Hello from {target}"),
        };
        if let Err(e) = writer.send(Status::r#Ok, body) {
            log::error!("{e}");
        }
    }));

    server.serve_threaded().map_err(std::io::Error::other)?;
    log::info!("listening on {}", server.local_addr());

    thread::sleep(Duration::from_secs(60));
    server.shutdown().map_err(std::io::Error::other)
}
