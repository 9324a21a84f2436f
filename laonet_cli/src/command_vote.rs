use super::{now, parse_arg, require_key};
use crate::net::emit;
use laonet::ecies_ed25519::ElectionPublicKey;
use laonet::*;

pub fn command_vote(matches: &clap::ArgMatches, config: &Config, secret_key: Option<&KeyPair>) {
    let keys = require_key(secret_key);
    let lao: Identifier = parse_arg(matches, "LAO-ID");
    let election: Identifier = parse_arg(matches, "ELECTION-ID");
    let question: Identifier = parse_arg(matches, "QUESTION-ID");
    let option: u16 = parse_arg(matches, "OPTION");

    let vote = match matches.value_of("election-key") {
        Some(_) => {
            let election_key: ElectionPublicKey = parse_arg(matches, "election-key");
            Vote::encrypted(&election, &question, option, &election_key).unwrap_or_else(|e| {
                eprintln!("laonet vote: unable to encrypt vote: {}", e);
                std::process::exit(1);
            })
        }
        None => Vote::plain(&election, &question, option as u32),
    };
    eprintln!("> Vote id: {}", vote.id());

    let channel = Channel::election(&lao, &election);
    let data = CastVote {
        lao,
        election,
        created_at: now(),
        votes: vec![vote],
    };
    emit(config, keys, &channel, data.into(), matches.is_present("post"));
}
