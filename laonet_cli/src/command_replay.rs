use super::expand;
use laonet::*;
use std::sync::Arc;

pub fn command_replay(matches: &clap::ArgMatches) {
    let filename = matches.value_of("INPUT").map(expand).unwrap_or_default();

    let file_bytes = std::fs::read(&filename).unwrap_or_else(|e| {
        eprintln!("laonet replay: unable to read {}: {}", filename, e);
        std::process::exit(1);
    });
    let entries: Vec<Params> = serde_json::from_slice(&file_bytes).unwrap_or_else(|e| {
        eprintln!("laonet replay: unable to read {}: {}", filename, e);
        std::process::exit(1);
    });

    let store = Arc::new(MemStore::new());
    let handler = MessageHandler::new(store.clone());

    let mut queue: Vec<(Channel, Envelope)> = entries
        .into_iter()
        .filter_map(|Params { channel, message }| message.map(|message| (channel, message)))
        .collect();
    let total = queue.len();
    let mut rejected = 0;

    // Messages that depend on later ones are retried until nothing changes
    loop {
        let before = queue.len();
        let mut deferred = Vec::new();
        for (channel, envelope) in queue {
            match handler.handle_message(&channel, &envelope) {
                Ok(_) => {}
                Err(e) if e.is_retriable() => deferred.push((channel, envelope)),
                Err(e) => {
                    rejected += 1;
                    eprintln!("Rejected {}: {}", envelope.message_id(), e);
                }
            }
        }

        let stuck = deferred.is_empty() || deferred.len() == before;
        queue = deferred;
        if stuck {
            break;
        }
    }
    for (_, envelope) in &queue {
        rejected += 1;
        eprintln!("Unresolved {}: depends on an unknown object", envelope.message_id());
    }

    println!("> Applied {} messages, {} rejected", total - rejected, rejected);
    print_state(&store, matches.is_present("print-tally"));
}

fn print_state(store: &MemStore, print_tally: bool) {
    for state in store.snapshot().laos {
        let lao = &state.lao;
        println!("LAO {} \"{}\"", lao.id, lao.name);
        println!("  organizer: {}", lao.organizer);
        println!("  witnesses: {}", lao.witnesses.len());

        for roll_call in state.roll_calls.values() {
            println!(
                "  roll call {} \"{}\": {:?}, {} attendees",
                roll_call.id,
                roll_call.name,
                roll_call.state,
                roll_call.attendees.len()
            );
        }

        for meeting in state.meetings.values() {
            println!(
                "  meeting {} \"{}\": starts {}, at {}",
                meeting.id,
                meeting.name,
                meeting.start,
                meeting.location.as_deref().unwrap_or("-")
            );
        }

        for election in state.elections.values() {
            println!(
                "  election {} \"{}\": {}, {} voters",
                election.id,
                election.name,
                election.state(),
                election.voter_count()
            );
            println!("    registered votes: {}", election.registered_votes_hash());

            if print_tally {
                print_results(election);
            }
        }

        println!(
            "  transactions: {}, supply: {}",
            state.ledger.transactions().count(),
            state.ledger.supply()
        );
    }
}

fn print_results(election: &Election) {
    let results = match election.results() {
        Some(results) => Some(results.clone()),
        None if election.state() == ElectionState::Closed
            && election.version == ElectionVersion::OpenBallot =>
        {
            election.clone().tally(None).ok()
        }
        None => None,
    };

    match results {
        Some(results) => {
            for (question_id, counts) in &results {
                let text = election
                    .question(question_id)
                    .map(|q| q.question.as_str())
                    .unwrap_or("?");
                println!("    {}", text);
                for result in counts {
                    println!("      {} got {} votes", result.ballot_option, result.count);
                }
            }
        }
        None => println!("    no results available"),
    }
}
