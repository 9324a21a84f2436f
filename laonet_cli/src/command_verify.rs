use super::expand;
use laonet::Envelope;

pub fn command_verify(matches: &clap::ArgMatches) {
    let filename = matches.value_of("INPUT").map(expand).unwrap_or_default();
    let envelopes = read_envelopes(&filename);

    let mut failed = 0;
    for envelope in &envelopes {
        let data = envelope.data();
        match envelope.verify() {
            Ok(()) => println!(
                "OK      {} {}/{} from {}",
                envelope.message_id(),
                data.object().as_str(),
                data.action().as_str(),
                envelope.sender()
            ),
            Err(e) => {
                failed += 1;
                println!("FAILED  {}: {}", envelope.message_id(), e);
            }
        }
    }

    if failed > 0 {
        eprintln!("> {} of {} messages failed verification", failed, envelopes.len());
        std::process::exit(1);
    }
    eprintln!("> {} messages verified OK", envelopes.len());
}

/// A single message or an array of them
fn read_envelopes(filename: &str) -> Vec<Envelope> {
    let file_bytes = std::fs::read(filename).unwrap_or_else(|e| {
        eprintln!("laonet verify: unable to read {}: {}", filename, e);
        std::process::exit(1);
    });

    let value: serde_json::Value = serde_json::from_slice(&file_bytes).unwrap_or_else(|e| {
        eprintln!("laonet verify: {} is not JSON: {}", filename, e);
        std::process::exit(1);
    });

    let envelopes = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|envelope| vec![envelope])
    };
    envelopes.unwrap_or_else(|e| {
        eprintln!("laonet verify: invalid message in {}: {}", filename, e);
        std::process::exit(1);
    })
}
