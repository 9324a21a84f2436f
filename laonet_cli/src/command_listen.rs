use crate::net::runtime;
use laonet::{Channel, Config, LaoNetwork};

pub fn command_listen(matches: &clap::ArgMatches, config: &Config) {
    let channels: Vec<Channel> = match matches.values_of("CHANNELS") {
        Some(values) => values
            .map(|raw| {
                raw.parse().unwrap_or_else(|e| {
                    eprintln!("laonet listen: {}", e);
                    std::process::exit(1);
                })
            })
            .collect(),
        None => vec![Channel::root()],
    };

    runtime().block_on(async {
        let network = LaoNetwork::connect(config.clone());
        let mut events = network.store().subscribe();

        for channel in &channels {
            if let Err(e) = network.join(channel).await {
                eprintln!("laonet listen: unable to join {}: {}", channel, e);
                std::process::exit(1);
            }
            eprintln!("> Joined {}", channel);
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => println!("{:?}", event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        eprintln!("> {} events missed", missed)
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        network.shutdown().await;
    });
}
