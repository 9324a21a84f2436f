use laonet::{connector_for, Channel, Client, Config, Envelope, KeyPair, MessageData};

/// Sign `data`, print the envelope and publish it when asked to
pub fn emit(config: &Config, keys: &KeyPair, channel: &Channel, data: MessageData, post: bool) {
    let envelope = Envelope::sign(keys, data).unwrap_or_else(|e| {
        eprintln!("laonet: unable to sign message: {}", e);
        std::process::exit(1);
    });

    let json = serde_json::to_string_pretty(&envelope).unwrap_or_else(|e| {
        eprintln!("laonet: unable to encode message: {}", e);
        std::process::exit(1);
    });
    println!("{}", json);

    if post {
        let message_id = envelope.message_id().clone();
        publish(config, channel, envelope);
        eprintln!("> Published {} on {}", message_id, channel);
    }
}

fn publish(config: &Config, channel: &Channel, envelope: Envelope) {
    let runtime = runtime();
    runtime.block_on(async {
        let (client, _broadcasts) =
            Client::new(config.clone(), connector_for(&config.server_address));
        let result = client.publish(channel, envelope).await;
        client.close().await;

        if let Err(e) = result {
            eprintln!("laonet: publish failed: {}", e);
            std::process::exit(1);
        }
    });
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("laonet: unable to start runtime: {}", e);
        std::process::exit(1);
    })
}
