use std::{io::Result, time::Duration};

use ferry::{
    client::{Client, ClientOptions},
    combinators::{when_all, Barrier, WaitResult},
};

fn main() -> Result<()> {
    env_logger::init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9080".to_owned());

    let client = Client::new(
        ClientOptions::default()
            .threads(1)
            .max_connections_per_host(8)
            .keep_alive(true),
    )
    .map_err(std::io::Error::other)?;

    let builder = client.get(&target).timeout(Duration::from_secs(2));
    let responses: Vec<_> = (0..3)
        .map(|i| {
            let response = builder.send();
            response.then(
                move |response| println!("#{i}: {} {}", response.status(), response.body_text()),
                move |error| eprintln!("#{i}: {error}"),
            );
            response
        })
        .collect();

    match Barrier::new(&when_all(responses)).wait_for(Duration::from_secs(5)) {
        WaitResult::Resolved(all) => println!("{} responses", all.len()),
        WaitResult::Rejected(error) => eprintln!("failed: {error}"),
        WaitResult::TimedOut => eprintln!("timed out"),
    }

    client.shutdown();
    Ok(())
}
